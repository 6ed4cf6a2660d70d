pub mod actor;
pub mod boxing;
pub mod parallel;
pub mod utils;
