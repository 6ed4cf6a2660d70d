//! Boxing: synthesis of the data-movement tasks between a producer and a
//! consumer that disagree on placement or distribution of a logical tensor.

pub mod broadcast;
pub mod builder;
pub mod chain;
pub mod collective;
pub mod ctx;
pub mod hierarchical;
pub mod naive;
pub mod one_to_one;
pub mod reduce;
pub mod slice_boxing;
pub mod task;

pub use broadcast::BroadcastSubTaskGraphBuilder;
pub use builder::{BoxingEdge, BuildOutcome, SubTaskGraph, SubTaskGraphBuilder, SubTaskGraphBuilderStatus};
pub use chain::ChainSubTaskGraphBuilder;
pub use collective::CollectiveBoxingSubTaskGraphBuilder;
pub use ctx::{find_nearest_src_parallel_id, SubTaskGraphBuilderCtx};
pub use hierarchical::{BoxingPlan, BoxingRequest, HierarchicalSubTaskGraphBuilder};
pub use naive::{NaiveAllToAllSubTaskGraphBuilder, NaiveB2BSubTaskGraphBuilder};
pub use one_to_one::OneToOneSubTaskGraphBuilder;
pub use reduce::{collaborative_parallel_axes_reduce, in_out_parallel_axes_reduce, parallel_axes_reduce};
pub use slice_boxing::SliceBoxingSubTaskGraphBuilder;
pub use task::{
    CollectiveBoxingDesc, CollectiveOp, CopyHdDirection, SliceBoxingMode, TaskGraph, TaskId, TaskKind, TaskNode,
};
