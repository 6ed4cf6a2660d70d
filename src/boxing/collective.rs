//! Redistribution through GPU collectives.
//!
//! Applies when both sides live on GPUs and the change of layout is one
//! collective primitive over the producer's device group:
//!
//! | producer | consumer | collective |
//! |---|---|---|
//! | `P` | `B` | AllReduce |
//! | `P` | `S(0)` | ReduceScatter |
//! | `S(0)` | `B` | AllGather |
//! | `S(i)` | `S(j)`, `i != j` | All2All |
//! | `P` | one device of the group | Reduce |
//!
//! Split axes must divide evenly across the group.

use super::builder::{BoxingEdge, BuildOutcome, SubTaskGraph, SubTaskGraphBuilder};
use super::ctx::SubTaskGraphBuilderCtx;
use super::task::{CollectiveBoxingDesc, CollectiveOp, TaskKind};
use crate::parallel::{DeviceType, SbpParallel};
use crate::utils::error::Result;

pub struct CollectiveBoxingSubTaskGraphBuilder;

fn divisible(edge: &BoxingEdge<'_>, axis: usize, parallel_num: usize) -> bool {
    let shape = &edge.logical_blob_desc.shape;
    axis < shape.num_axes() && shape.at(axis) % parallel_num == 0
}

/// The collective for this edge and its root rank, if any.
fn select_collective(edge: &BoxingEdge<'_>) -> Option<(CollectiveOp, Option<usize>)> {
    let in_desc = edge.in_parallel_desc;
    let out_desc = edge.out_parallel_desc;
    if in_desc.device_type() != DeviceType::Gpu || out_desc.device_type() != DeviceType::Gpu {
        return None;
    }
    let n = edge.in_num();
    if n <= 1 || edge.logical_blob_desc.is_dynamic {
        return None;
    }

    if in_desc.equals_ignoring_hierarchy(out_desc) {
        return match (edge.in_sbp, edge.out_sbp) {
            (SbpParallel::PartialSum, SbpParallel::Broadcast) => Some((CollectiveOp::AllReduce, None)),
            (SbpParallel::PartialSum, SbpParallel::Split(0)) if divisible(edge, 0, n) => {
                Some((CollectiveOp::ReduceScatter, None))
            }
            (SbpParallel::Split(0), SbpParallel::Broadcast) if divisible(edge, 0, n) => {
                Some((CollectiveOp::AllGather, None))
            }
            (SbpParallel::Split(i), SbpParallel::Split(j))
                if i != j && divisible(edge, i, n) && divisible(edge, j, n) =>
            {
                Some((CollectiveOp::All2All, None))
            }
            _ => None,
        };
    }

    if edge.in_sbp.is_partial_sum() && edge.out_num() == 1 {
        let (machine_id, device_id) = out_desc.machine_and_device(0);
        let root = in_desc.parallel_id_of(machine_id, device_id)?;
        return Some((CollectiveOp::Reduce, Some(root)));
    }
    None
}

impl SubTaskGraphBuilder for CollectiveBoxingSubTaskGraphBuilder {
    fn name(&self) -> &'static str {
        "CollectiveBoxingSubTaskGraphBuilder"
    }

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome> {
        let Some((op, root)) = select_collective(edge) else {
            return Ok(BuildOutcome::Declined);
        };

        let in_desc = edge.in_parallel_desc;
        let group_size = edge.in_num();
        let op_name = format!("System-Boxing-Collective-{}-{}", op, edge.lbi);
        let mut rank_tasks = Vec::with_capacity(group_size);
        for rank in 0..group_size {
            let (machine_id, _) = in_desc.machine_and_device(rank);
            let desc = CollectiveBoxingDesc {
                op,
                op_name: op_name.clone(),
                rank,
                group_size,
                root,
                shape: edge.logical_blob_desc.shape.clone(),
                data_type: edge.logical_blob_desc.data_type,
            };
            let in_node = edge.in_node(rank);
            let task = ctx.new_task_like(in_node, TaskKind::CollectiveBoxing(desc), machine_id, in_desc.mem_zone(rank));
            ctx.connect(in_node, task);
            rank_tasks.push(task);
        }

        let sorted_out_tasks = match root {
            Some(root) => vec![rank_tasks[root]],
            None => rank_tasks,
        };
        Ok(BuildOutcome::Built(SubTaskGraph::new(sorted_out_tasks, edge.status(self.name(), op.to_string()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxing::builder::EdgeFixture;

    fn collective_descs(ctx: &SubTaskGraphBuilderCtx, tasks: &[crate::boxing::task::TaskId]) -> Vec<CollectiveBoxingDesc> {
        tasks
            .iter()
            .filter_map(|&id| match &ctx.task_graph().node(id).kind {
                TaskKind::CollectiveBoxing(desc) => Some(desc.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_all_reduce() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-3"], SbpParallel::PartialSum),
            ("gpu", &["0:0-3"], SbpParallel::Broadcast),
            vec![8, 4],
        )?;
        let BuildOutcome::Built(graph) = CollectiveBoxingSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        let descs = collective_descs(&ctx, &graph.sorted_out_tasks);
        assert_eq!(descs.len(), 4);
        assert!(descs.iter().all(|d| d.op == CollectiveOp::AllReduce && d.group_size == 4));
        assert_eq!(descs.iter().map(|d| d.rank).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(graph.status.comment, "AllReduce");
        Ok(())
    }

    #[test]
    fn test_reduce_to_member_device() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-3"], SbpParallel::PartialSum),
            ("gpu", &["0:2"], SbpParallel::Broadcast),
            vec![8],
        )?;
        let BuildOutcome::Built(graph) = CollectiveBoxingSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        let descs = collective_descs(&ctx, &graph.sorted_out_tasks);
        assert_eq!(descs.len(), 1);
        assert_eq!((descs[0].op, descs[0].rank, descs[0].root), (CollectiveOp::Reduce, 2, Some(2)));
        // Every rank still takes part.
        assert_eq!(ctx.task_graph().len(), 8);
        Ok(())
    }

    #[test]
    fn test_declines_uneven_split() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-3"], SbpParallel::Split(0)),
            ("gpu", &["0:0-3"], SbpParallel::Broadcast),
            vec![6],
        )?;
        let outcome = CollectiveBoxingSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())?;
        assert!(matches!(outcome, BuildOutcome::Declined));
        Ok(())
    }

    #[test]
    fn test_declines_cpu() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("cpu", &["0:0", "1:0"], SbpParallel::PartialSum),
            ("cpu", &["0:0", "1:0"], SbpParallel::Broadcast),
            vec![8],
        )?;
        let outcome = CollectiveBoxingSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())?;
        assert!(matches!(outcome, BuildOutcome::Declined));
        Ok(())
    }
}
