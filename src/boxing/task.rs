//! Task nodes produced by boxing and the arena they live in.

use crate::parallel::{LogicalBlobId, MemZone, Shape, TensorSliceView};
use candle_core::DType;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyHdDirection {
    H2D,
    D2H,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceBoxingMode {
    /// Assemble the output view by copying input views into it.
    Copy,
    /// Sum same-shaped input views into the output view.
    Add,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectiveOp {
    AllReduce,
    ReduceScatter,
    AllGather,
    All2All,
    Reduce,
}

impl fmt::Display for CollectiveOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CollectiveOp::AllReduce => "AllReduce",
            CollectiveOp::ReduceScatter => "ReduceScatter",
            CollectiveOp::AllGather => "AllGather",
            CollectiveOp::All2All => "All2All",
            CollectiveOp::Reduce => "Reduce",
        };
        write!(f, "{}", name)
    }
}

/// What one rank contributes to a collective.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectiveBoxingDesc {
    pub op: CollectiveOp,
    /// Shared by every rank of the same collective.
    pub op_name: String,
    pub rank: usize,
    pub group_size: usize,
    pub root: Option<usize>,
    pub shape: Shape,
    pub data_type: DType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskKind {
    /// A producer or consumer supplied by the compiler.
    Compute { op_name: String },
    CopyHd(CopyHdDirection),
    /// Host-to-host transfer between machines.
    CopyCommNet,
    SliceBoxing {
        mode: SliceBoxingMode,
        out_view: TensorSliceView,
        in_views: Vec<(TaskId, TensorSliceView)>,
    },
    CollectiveBoxing(CollectiveBoxingDesc),
    BoxingZeros { shape: Shape },
    BoxingIdentity,
}

impl TaskKind {
    pub fn is_copy(&self) -> bool {
        matches!(self, TaskKind::CopyHd(_) | TaskKind::CopyCommNet)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskNode {
    pub id: TaskId,
    pub kind: TaskKind,
    pub machine_id: usize,
    pub mem_zone: MemZone,
    pub lbi: LogicalBlobId,
    /// How often the task fires per iteration of the consumer.
    pub time_shape: Shape,
}

/// Append-only arena of task nodes and data edges.
#[derive(Debug, Default)]
pub struct TaskGraph {
    nodes: Vec<TaskNode>,
    edges: Vec<(TaskId, TaskId)>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(
        &mut self,
        kind: TaskKind,
        machine_id: usize,
        mem_zone: MemZone,
        lbi: LogicalBlobId,
        time_shape: Shape,
    ) -> TaskId {
        let id = TaskId(self.nodes.len());
        self.nodes.push(TaskNode { id, kind, machine_id, mem_zone, lbi, time_shape });
        id
    }

    pub fn connect(&mut self, src: TaskId, dst: TaskId) {
        self.edges.push((src, dst));
    }

    /// Whether `id` was handed out by this graph.
    pub fn contains(&self, id: TaskId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn node(&self, id: TaskId) -> &TaskNode {
        &self.nodes[id.0]
    }

    pub(crate) fn node_mut(&mut self, id: TaskId) -> &mut TaskNode {
        &mut self.nodes[id.0]
    }

    pub fn nodes(&self) -> &[TaskNode] {
        &self.nodes
    }

    pub fn edges(&self) -> &[(TaskId, TaskId)] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Id the next added node will receive.
    pub fn next_id(&self) -> TaskId {
        TaskId(self.nodes.len())
    }

    /// Every node added at or after `first`.
    pub fn ids_from(&self, first: TaskId) -> Vec<TaskId> {
        (first.0..self.nodes.len()).map(TaskId).collect()
    }

    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.edges.iter().filter(|(_, dst)| *dst == id).map(|(src, _)| *src).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_only_issued_ids() {
        let mut graph = TaskGraph::new();
        assert!(!graph.contains(TaskId(0)));
        let id = graph.add_node(
            TaskKind::BoxingIdentity,
            0,
            MemZone::Host,
            LogicalBlobId::new("producer", "out"),
            Shape::new(vec![1]),
        );
        assert!(graph.contains(id));
        assert!(!graph.contains(graph.next_id()));
    }
}
