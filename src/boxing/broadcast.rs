use super::builder::{BoxingEdge, BuildOutcome, SubTaskGraph, SubTaskGraphBuilder};
use super::ctx::{find_nearest_src_parallel_id, SubTaskGraphBuilderCtx};
use crate::utils::error::Result;

/// Replicated data crossing between a single device and a group:
/// a broadcast (or single) producer feeding one consumer reads from the
/// nearest replica, and a single producer feeding a broadcast group is
/// fanned out with one copy per consumer device.
pub struct BroadcastSubTaskGraphBuilder;

impl SubTaskGraphBuilder for BroadcastSubTaskGraphBuilder {
    fn name(&self) -> &'static str {
        "BroadcastSubTaskGraphBuilder"
    }

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome> {
        let out_desc = edge.out_parallel_desc;

        if (edge.in_num() == 1 || edge.in_sbp.is_broadcast()) && edge.out_num() == 1 {
            let nearest = find_nearest_src_parallel_id(edge.in_parallel_desc, out_desc, 0);
            let (machine_id, _) = out_desc.machine_and_device(0);
            let proxy = ctx.get_proxy_node(edge.in_node(nearest), machine_id, out_desc.mem_zone(0));
            let comment = format!("nearest replica {}", nearest);
            return Ok(BuildOutcome::Built(SubTaskGraph::new(vec![proxy], edge.status(self.name(), comment))));
        }

        if edge.in_num() == 1 && edge.out_num() > 1 && edge.out_sbp.is_broadcast() {
            let sorted_out_tasks = (0..edge.out_num())
                .map(|parallel_id| {
                    let (machine_id, _) = out_desc.machine_and_device(parallel_id);
                    ctx.get_proxy_node(edge.in_node(0), machine_id, out_desc.mem_zone(parallel_id))
                })
                .collect();
            return Ok(BuildOutcome::Built(SubTaskGraph::new(sorted_out_tasks, edge.status(self.name(), "fan out"))));
        }

        Ok(BuildOutcome::Declined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxing::builder::EdgeFixture;
    use crate::parallel::{MemZone, SbpParallel};

    #[test]
    fn test_reads_nearest_replica() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Broadcast),
            ("gpu", &["0:1"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = BroadcastSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        assert_eq!(graph.sorted_out_tasks, vec![fixture.sorted_in_tasks[1]]);
        assert_eq!(graph.status.comment, "nearest replica 1");
        Ok(())
    }

    #[test]
    fn test_fans_out() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0"], SbpParallel::Broadcast),
            ("gpu", &["0:0-2"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = BroadcastSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        assert_eq!(graph.sorted_out_tasks.len(), 3);
        assert_eq!(graph.sorted_out_tasks[0], fixture.sorted_in_tasks[0]);
        let zones: Vec<_> = graph
            .sorted_out_tasks
            .iter()
            .map(|&id| ctx.task_graph().node(id).mem_zone)
            .collect();
        assert_eq!(zones, vec![MemZone::Device(0), MemZone::Device(1), MemZone::Device(2)]);
        Ok(())
    }

    #[test]
    fn test_declines_split_groups() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            ("gpu", &["0:0-2"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let outcome = BroadcastSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())?;
        assert!(matches!(outcome, BuildOutcome::Declined));
        Ok(())
    }
}
