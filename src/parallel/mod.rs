//! Placement and distribution descriptors shared by the planner and runtime.

pub mod blob;
pub mod desc;
pub mod sbp;
pub mod shape;
pub mod slice;

pub use blob::{BlobDesc, LogicalBlobId};
pub use desc::{DeviceType, MemZone, ParallelConf, ParallelDesc};
pub use sbp::{ParallelDistribution, SbpParallel};
pub use shape::Shape;
pub use slice::{slice_views_for, BalancedSplitter, TensorSliceView};
