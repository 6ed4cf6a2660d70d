use super::ctx::SubTaskGraphBuilderCtx;
use super::task::TaskId;
use crate::parallel::{BlobDesc, LogicalBlobId, ParallelDesc, SbpParallel, Shape};
use crate::utils::error::Result;
use std::fmt;

/// A rank-1 producer/consumer edge handed to a [`SubTaskGraphBuilder`].
#[derive(Debug, Clone, Copy)]
pub struct BoxingEdge<'a> {
    /// One producer task per producer device, in parallel-id order.
    pub sorted_in_tasks: &'a [TaskId],
    pub in_parallel_desc: &'a ParallelDesc,
    pub out_parallel_desc: &'a ParallelDesc,
    pub lbi: &'a LogicalBlobId,
    pub logical_blob_desc: &'a BlobDesc,
    pub in_sbp: SbpParallel,
    pub out_sbp: SbpParallel,
    pub time_shape: &'a Shape,
}

impl<'a> BoxingEdge<'a> {
    pub fn in_node(&self, parallel_id: usize) -> TaskId {
        self.sorted_in_tasks[parallel_id]
    }

    pub fn in_num(&self) -> usize {
        self.in_parallel_desc.parallel_num()
    }

    pub fn out_num(&self) -> usize {
        self.out_parallel_desc.parallel_num()
    }

    pub fn status(&self, builder_name: &str, comment: impl Into<String>) -> SubTaskGraphBuilderStatus {
        SubTaskGraphBuilderStatus {
            builder_name: builder_name.to_string(),
            comment: comment.into(),
            lbi: self.lbi.to_string(),
            src: format!("{}{}", self.in_parallel_desc, self.in_sbp),
            dst: format!("{}{}", self.out_parallel_desc, self.out_sbp),
        }
    }
}

/// Which builder produced a plan, and for what.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubTaskGraphBuilderStatus {
    pub builder_name: String,
    pub comment: String,
    pub lbi: String,
    pub src: String,
    pub dst: String,
}

impl fmt::Display for SubTaskGraphBuilderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.builder_name)?;
        if !self.comment.is_empty() {
            write!(f, "({})", self.comment)?;
        }
        write!(f, ": {} {} -> {}", self.lbi, self.src, self.dst)
    }
}

/// Tasks a builder wired up for one edge.
#[derive(Debug, Clone)]
pub struct SubTaskGraph {
    /// One task per consumer device holding that device's share.
    pub sorted_out_tasks: Vec<TaskId>,
    /// Extra control predecessors per consumer device.
    pub sorted_ctrl_tasks: Vec<Vec<TaskId>>,
    pub status: SubTaskGraphBuilderStatus,
}

impl SubTaskGraph {
    pub fn new(sorted_out_tasks: Vec<TaskId>, status: SubTaskGraphBuilderStatus) -> Self {
        let sorted_ctrl_tasks = vec![Vec::new(); sorted_out_tasks.len()];
        Self { sorted_out_tasks, sorted_ctrl_tasks, status }
    }
}

pub enum BuildOutcome {
    Built(SubTaskGraph),
    /// Not applicable to this edge; nothing was added to the task graph.
    Declined,
}

pub trait SubTaskGraphBuilder: Send + Sync {
    fn name(&self) -> &'static str;

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome>;
}

/// Owns everything a [`BoxingEdge`] borrows, for builder unit tests.
#[cfg(test)]
pub(crate) struct EdgeFixture {
    pub sorted_in_tasks: Vec<TaskId>,
    pub in_parallel_desc: ParallelDesc,
    pub out_parallel_desc: ParallelDesc,
    pub lbi: LogicalBlobId,
    pub logical_blob_desc: BlobDesc,
    pub in_sbp: SbpParallel,
    pub out_sbp: SbpParallel,
    pub time_shape: Shape,
}

#[cfg(test)]
impl EdgeFixture {
    pub fn new(
        ctx: &mut SubTaskGraphBuilderCtx,
        (in_tag, in_devices, in_sbp): (&str, &[&str], SbpParallel),
        (out_tag, out_devices, out_sbp): (&str, &[&str], SbpParallel),
        shape: Vec<usize>,
    ) -> Result<Self> {
        use crate::parallel::ParallelConf;

        let in_parallel_desc = ParallelDesc::new(&ParallelConf::new(in_tag, in_devices))?;
        let out_parallel_desc = ParallelDesc::new(&ParallelConf::new(out_tag, out_devices))?;
        let lbi = LogicalBlobId::new("producer", "out");
        let time_shape = Shape::new(vec![1]);
        let sorted_in_tasks = ctx.add_compute_tasks("producer", &in_parallel_desc, &lbi, &time_shape);
        Ok(Self {
            sorted_in_tasks,
            in_parallel_desc,
            out_parallel_desc,
            lbi,
            logical_blob_desc: BlobDesc::new(Shape::new(shape), candle_core::DType::F32),
            in_sbp,
            out_sbp,
            time_shape,
        })
    }

    pub fn edge(&self) -> BoxingEdge<'_> {
        BoxingEdge {
            sorted_in_tasks: &self.sorted_in_tasks,
            in_parallel_desc: &self.in_parallel_desc,
            out_parallel_desc: &self.out_parallel_desc,
            lbi: &self.lbi,
            logical_blob_desc: &self.logical_blob_desc,
            in_sbp: self.in_sbp,
            out_sbp: self.out_sbp,
            time_shape: &self.time_shape,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            ("gpu", &["0:0-1"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let status = fixture.edge().status("SliceBoxingSubTaskGraphBuilder", "S2B");
        assert_eq!(
            status.to_string(),
            "SliceBoxingSubTaskGraphBuilder(S2B): producer/out gpu[0:0-1](2)S(0) -> gpu[0:0-1](2)B"
        );
        let bare = fixture.edge().status("OneToOneSubTaskGraphBuilder", "");
        assert!(bare.to_string().starts_with("OneToOneSubTaskGraphBuilder: producer/out"));
        Ok(())
    }
}
