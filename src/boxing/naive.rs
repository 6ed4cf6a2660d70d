//! Pass-through builders at the end of the chain.
//!
//! [`NaiveB2BSubTaskGraphBuilder`] covers replicated-to-replicated edges the
//! earlier builders left over. [`NaiveAllToAllSubTaskGraphBuilder`] accepts
//! every edge: it rebuilds the whole tensor next to each consumer and then
//! cuts, keeps or zeroes it to match the consumer's layout.

use super::builder::{BoxingEdge, BuildOutcome, SubTaskGraph, SubTaskGraphBuilder};
use super::ctx::{find_nearest_src_parallel_id, SubTaskGraphBuilderCtx};
use super::task::{SliceBoxingMode, TaskId, TaskKind};
use crate::parallel::{slice_views_for, SbpParallel, TensorSliceView};
use crate::utils::error::Result;

pub struct NaiveB2BSubTaskGraphBuilder;

impl SubTaskGraphBuilder for NaiveB2BSubTaskGraphBuilder {
    fn name(&self) -> &'static str {
        "NaiveB2BSubTaskGraphBuilder"
    }

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome> {
        if !((edge.in_num() == 1 || edge.in_sbp.is_broadcast()) && edge.out_sbp.is_broadcast()) {
            return Ok(BuildOutcome::Declined);
        }

        let out_desc = edge.out_parallel_desc;
        let sorted_out_tasks = (0..edge.out_num())
            .map(|out_id| {
                let nearest = find_nearest_src_parallel_id(edge.in_parallel_desc, out_desc, out_id);
                let (machine_id, _) = out_desc.machine_and_device(out_id);
                let zone = out_desc.mem_zone(out_id);
                let proxy = ctx.get_proxy_node(edge.in_node(nearest), machine_id, zone);
                let identity = ctx.new_task_like(proxy, TaskKind::BoxingIdentity, machine_id, zone);
                ctx.connect(proxy, identity);
                identity
            })
            .collect();
        Ok(BuildOutcome::Built(SubTaskGraph::new(sorted_out_tasks, edge.status(self.name(), ""))))
    }
}

pub struct NaiveAllToAllSubTaskGraphBuilder;

impl NaiveAllToAllSubTaskGraphBuilder {
    /// A task holding the whole logical tensor on consumer `out_id`'s device.
    fn materialize_full(
        ctx: &mut SubTaskGraphBuilderCtx,
        edge: &BoxingEdge<'_>,
        in_views: &[TensorSliceView],
        full: &TensorSliceView,
        out_id: usize,
    ) -> TaskId {
        let out_desc = edge.out_parallel_desc;
        let (machine_id, _) = out_desc.machine_and_device(out_id);
        let zone = out_desc.mem_zone(out_id);

        let mode = match edge.in_sbp {
            SbpParallel::Broadcast => {
                let nearest = find_nearest_src_parallel_id(edge.in_parallel_desc, out_desc, out_id);
                return ctx.get_proxy_node(edge.in_node(nearest), machine_id, zone);
            }
            SbpParallel::Split(_) => SliceBoxingMode::Copy,
            SbpParallel::PartialSum => SliceBoxingMode::Add,
        };
        let node = ctx.new_task_like(
            edge.in_node(0),
            TaskKind::SliceBoxing { mode, out_view: full.clone(), in_views: Vec::new() },
            machine_id,
            zone,
        );
        for (in_id, in_view) in in_views.iter().enumerate() {
            if in_view.is_empty() {
                continue;
            }
            let proxy = ctx.get_proxy_node(edge.in_node(in_id), machine_id, zone);
            ctx.add_slice_input(node, proxy, in_view.clone());
        }
        node
    }
}

impl SubTaskGraphBuilder for NaiveAllToAllSubTaskGraphBuilder {
    fn name(&self) -> &'static str {
        "NaiveAllToAllSubTaskGraphBuilder"
    }

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome> {
        let shape = &edge.logical_blob_desc.shape;
        let full = TensorSliceView::full(shape);
        let in_views = slice_views_for(edge.in_num(), edge.in_sbp, shape)?;
        let out_views = slice_views_for(edge.out_num(), edge.out_sbp, shape)?;
        let out_desc = edge.out_parallel_desc;

        let mut sorted_out_tasks = Vec::with_capacity(edge.out_num());
        let mut sorted_ctrl_tasks = vec![Vec::new(); edge.out_num()];
        for out_id in 0..edge.out_num() {
            let (machine_id, _) = out_desc.machine_and_device(out_id);
            let zone = out_desc.mem_zone(out_id);

            let out_node = match edge.out_sbp {
                SbpParallel::Broadcast => Self::materialize_full(ctx, edge, &in_views, &full, out_id),
                SbpParallel::Split(_) => {
                    let whole = Self::materialize_full(ctx, edge, &in_views, &full, out_id);
                    let sliced = ctx.new_task_like(
                        whole,
                        TaskKind::SliceBoxing {
                            mode: SliceBoxingMode::Copy,
                            out_view: out_views[out_id].clone(),
                            in_views: Vec::new(),
                        },
                        machine_id,
                        zone,
                    );
                    ctx.add_slice_input(sliced, whole, full.clone());
                    sliced
                }
                // Only the first consumer carries the value; the rest add zero.
                SbpParallel::PartialSum if out_id == 0 => {
                    Self::materialize_full(ctx, edge, &in_views, &full, out_id)
                }
                SbpParallel::PartialSum => {
                    let nearest = find_nearest_src_parallel_id(edge.in_parallel_desc, out_desc, out_id);
                    let in_node = edge.in_node(nearest);
                    sorted_ctrl_tasks[out_id].push(in_node);
                    ctx.new_task_like(in_node, TaskKind::BoxingZeros { shape: shape.clone() }, machine_id, zone)
                }
            };
            sorted_out_tasks.push(out_node);
        }
        let status = edge.status(self.name(), format!("{}2{}", edge.in_sbp, edge.out_sbp));
        Ok(BuildOutcome::Built(SubTaskGraph { sorted_out_tasks, sorted_ctrl_tasks, status }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxing::builder::EdgeFixture;

    #[test]
    fn test_b2b_identity() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Broadcast),
            ("gpu", &["0:2-3"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = NaiveB2BSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        for &out in &graph.sorted_out_tasks {
            assert_eq!(ctx.task_graph().node(out).kind, TaskKind::BoxingIdentity);
            assert_eq!(ctx.task_graph().predecessors(out).len(), 1);
        }
        Ok(())
    }

    #[test]
    fn test_b2b_declines_split() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            ("gpu", &["0:0-1"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let outcome = NaiveB2BSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())?;
        assert!(matches!(outcome, BuildOutcome::Declined));
        Ok(())
    }

    #[test]
    fn test_all_to_all_split_to_partial() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            ("gpu", &["0:0-1"], SbpParallel::PartialSum),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = NaiveAllToAllSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };

        match &ctx.task_graph().node(graph.sorted_out_tasks[0]).kind {
            TaskKind::SliceBoxing { mode, out_view, in_views } => {
                assert_eq!(*mode, SliceBoxingMode::Copy);
                assert_eq!(out_view, &TensorSliceView::new(vec![0..4]));
                assert_eq!(in_views.len(), 2);
            }
            other => panic!("expected a slice boxing task, got {:?}", other),
        }
        assert!(matches!(
            ctx.task_graph().node(graph.sorted_out_tasks[1]).kind,
            TaskKind::BoxingZeros { .. }
        ));
        assert!(graph.sorted_ctrl_tasks[0].is_empty());
        assert_eq!(graph.sorted_ctrl_tasks[1], vec![fixture.sorted_in_tasks[1]]);
        Ok(())
    }

    #[test]
    fn test_all_to_all_broadcast_to_split() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("cpu", &["0:0"], SbpParallel::Broadcast),
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = NaiveAllToAllSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        let views: Vec<_> = graph
            .sorted_out_tasks
            .iter()
            .map(|&id| match &ctx.task_graph().node(id).kind {
                TaskKind::SliceBoxing { out_view, .. } => out_view.clone(),
                other => panic!("expected a slice boxing task, got {:?}", other),
            })
            .collect();
        assert_eq!(views, vec![TensorSliceView::new(vec![0..2]), TensorSliceView::new(vec![2..4])]);
        Ok(())
    }
}
