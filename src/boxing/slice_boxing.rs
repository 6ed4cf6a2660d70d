//! Redistribution as rectangular slice copies and slice sums.

use super::builder::{BoxingEdge, BuildOutcome, SubTaskGraph, SubTaskGraphBuilder};
use super::ctx::{find_nearest_src_parallel_id, SubTaskGraphBuilderCtx};
use super::task::{SliceBoxingMode, TaskId, TaskKind};
use crate::parallel::{slice_views_for, MemZone, SbpParallel, TensorSliceView};
use crate::utils::error::Result;

pub struct SliceBoxingSubTaskGraphBuilder;

fn slice_task(
    ctx: &mut SubTaskGraphBuilderCtx,
    like: TaskId,
    mode: SliceBoxingMode,
    out_view: TensorSliceView,
    machine_id: usize,
    zone: MemZone,
) -> TaskId {
    ctx.new_task_like(
        like,
        TaskKind::SliceBoxing { mode, out_view, in_views: Vec::new() },
        machine_id,
        zone,
    )
}

impl SliceBoxingSubTaskGraphBuilder {
    /// S->S and S->B: each consumer copies together the producer shards
    /// overlapping its view. A shard only partly needed is cut down on the
    /// producer's device first so less data crosses devices.
    fn build_gather(
        ctx: &mut SubTaskGraphBuilderCtx,
        edge: &BoxingEdge<'_>,
        in_views: &[TensorSliceView],
        out_views: &[TensorSliceView],
    ) -> Vec<TaskId> {
        let in_desc = edge.in_parallel_desc;
        let out_desc = edge.out_parallel_desc;
        let mut sorted_out_tasks = Vec::with_capacity(out_views.len());
        for (out_id, out_view) in out_views.iter().enumerate() {
            let (machine_id, _) = out_desc.machine_and_device(out_id);
            let zone = out_desc.mem_zone(out_id);
            let out_node = slice_task(ctx, edge.in_node(0), SliceBoxingMode::Copy, out_view.clone(), machine_id, zone);

            for (in_id, in_view) in in_views.iter().enumerate() {
                let intersection = in_view.intersect(out_view);
                if intersection.is_empty() {
                    continue;
                }
                let in_node = edge.in_node(in_id);
                let src = if intersection == *in_view {
                    in_node
                } else {
                    let (in_machine, _) = in_desc.machine_and_device(in_id);
                    let pre = slice_task(
                        ctx,
                        in_node,
                        SliceBoxingMode::Copy,
                        intersection.clone(),
                        in_machine,
                        in_desc.mem_zone(in_id),
                    );
                    ctx.add_slice_input(pre, in_node, in_view.clone());
                    pre
                };
                let proxy = ctx.get_proxy_node(src, machine_id, zone);
                ctx.add_slice_input(out_node, proxy, intersection);
            }
            sorted_out_tasks.push(out_node);
        }
        sorted_out_tasks
    }

    /// B->S: cut each consumer's view out of the nearest replica, on the
    /// replica's device.
    fn build_b2s(
        ctx: &mut SubTaskGraphBuilderCtx,
        edge: &BoxingEdge<'_>,
        full: &TensorSliceView,
        out_views: &[TensorSliceView],
    ) -> Vec<TaskId> {
        let in_desc = edge.in_parallel_desc;
        let out_desc = edge.out_parallel_desc;
        out_views
            .iter()
            .enumerate()
            .map(|(out_id, out_view)| {
                let nearest = find_nearest_src_parallel_id(in_desc, out_desc, out_id);
                let in_node = edge.in_node(nearest);
                let (in_machine, _) = in_desc.machine_and_device(nearest);
                let sliced = slice_task(
                    ctx,
                    in_node,
                    SliceBoxingMode::Copy,
                    out_view.clone(),
                    in_machine,
                    in_desc.mem_zone(nearest),
                );
                ctx.add_slice_input(sliced, in_node, full.clone());
                let (machine_id, _) = out_desc.machine_and_device(out_id);
                ctx.get_proxy_node(sliced, machine_id, out_desc.mem_zone(out_id))
            })
            .collect()
    }

    /// P->S and P->B: every partial contributes the consumer's view, summed
    /// on the consumer's device.
    fn build_reduce(
        ctx: &mut SubTaskGraphBuilderCtx,
        edge: &BoxingEdge<'_>,
        full: &TensorSliceView,
        out_views: &[TensorSliceView],
    ) -> Vec<TaskId> {
        let in_desc = edge.in_parallel_desc;
        let out_desc = edge.out_parallel_desc;
        let mut sorted_out_tasks = Vec::with_capacity(out_views.len());
        for (out_id, out_view) in out_views.iter().enumerate() {
            let (machine_id, _) = out_desc.machine_and_device(out_id);
            let zone = out_desc.mem_zone(out_id);
            let add = slice_task(ctx, edge.in_node(0), SliceBoxingMode::Add, out_view.clone(), machine_id, zone);

            for in_id in 0..edge.in_num() {
                let in_node = edge.in_node(in_id);
                let src = if out_view == full {
                    in_node
                } else {
                    let (in_machine, _) = in_desc.machine_and_device(in_id);
                    let sliced = slice_task(
                        ctx,
                        in_node,
                        SliceBoxingMode::Copy,
                        out_view.clone(),
                        in_machine,
                        in_desc.mem_zone(in_id),
                    );
                    ctx.add_slice_input(sliced, in_node, full.clone());
                    sliced
                };
                let proxy = ctx.get_proxy_node(src, machine_id, zone);
                ctx.add_slice_input(add, proxy, out_view.clone());
            }
            sorted_out_tasks.push(add);
        }
        sorted_out_tasks
    }
}

impl SubTaskGraphBuilder for SliceBoxingSubTaskGraphBuilder {
    fn name(&self) -> &'static str {
        "SliceBoxingSubTaskGraphBuilder"
    }

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome> {
        if edge.logical_blob_desc.is_dynamic {
            return Ok(BuildOutcome::Declined);
        }
        let comment = match (edge.in_sbp, edge.out_sbp) {
            (SbpParallel::Split(_), SbpParallel::Split(_)) => "S2S",
            (SbpParallel::Split(_), SbpParallel::Broadcast) => "S2B",
            (SbpParallel::Broadcast, SbpParallel::Split(_)) => "B2S",
            (SbpParallel::PartialSum, SbpParallel::Split(_)) => "P2S",
            (SbpParallel::PartialSum, SbpParallel::Broadcast) => "P2B",
            _ => return Ok(BuildOutcome::Declined),
        };

        let shape = &edge.logical_blob_desc.shape;
        let full = TensorSliceView::full(shape);
        let in_views = slice_views_for(edge.in_num(), edge.in_sbp, shape)?;
        let out_views = slice_views_for(edge.out_num(), edge.out_sbp, shape)?;

        let sorted_out_tasks = match edge.in_sbp {
            SbpParallel::Split(_) => Self::build_gather(ctx, edge, &in_views, &out_views),
            SbpParallel::Broadcast => Self::build_b2s(ctx, edge, &full, &out_views),
            SbpParallel::PartialSum => Self::build_reduce(ctx, edge, &full, &out_views),
        };
        Ok(BuildOutcome::Built(SubTaskGraph::new(sorted_out_tasks, edge.status(self.name(), comment))))
    }
}
