use super::builder::{BoxingEdge, BuildOutcome, SubTaskGraph, SubTaskGraphBuilder};
use super::ctx::SubTaskGraphBuilderCtx;
use crate::utils::error::Result;

/// Rank `i` of the consumer reads rank `i` of the producer as is.
pub struct OneToOneSubTaskGraphBuilder;

impl SubTaskGraphBuilder for OneToOneSubTaskGraphBuilder {
    fn name(&self) -> &'static str {
        "OneToOneSubTaskGraphBuilder"
    }

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome> {
        let same_layout = edge.in_num() == edge.out_num() && edge.in_sbp == edge.out_sbp;
        let single = edge.in_num() == 1 && edge.out_num() == 1;
        if !same_layout && !single {
            return Ok(BuildOutcome::Declined);
        }

        let sorted_out_tasks = (0..edge.out_num())
            .map(|parallel_id| {
                let (machine_id, _) = edge.out_parallel_desc.machine_and_device(parallel_id);
                let zone = edge.out_parallel_desc.mem_zone(parallel_id);
                ctx.get_proxy_node(edge.in_node(parallel_id), machine_id, zone)
            })
            .collect();
        Ok(BuildOutcome::Built(SubTaskGraph::new(sorted_out_tasks, edge.status(self.name(), ""))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxing::builder::EdgeFixture;
    use crate::parallel::SbpParallel;

    #[test]
    fn test_same_layout_passes_through() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            vec![4, 4],
        )?;
        let BuildOutcome::Built(graph) = OneToOneSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        assert_eq!(graph.sorted_out_tasks, fixture.sorted_in_tasks);
        assert_eq!(ctx.task_graph().len(), 2);
        Ok(())
    }

    #[test]
    fn test_moves_between_devices() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Broadcast),
            ("gpu", &["0:2-3"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = OneToOneSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        let out = ctx.task_graph().node(graph.sorted_out_tasks[1]);
        assert_eq!(out.mem_zone, crate::parallel::MemZone::Device(3));
        Ok(())
    }

    #[test]
    fn test_declines_layout_change() -> Result<()> {
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            ("gpu", &["0:0-1"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let outcome = OneToOneSubTaskGraphBuilder.build(&mut ctx, &fixture.edge())?;
        assert!(matches!(outcome, BuildOutcome::Declined));
        assert_eq!(ctx.task_graph().len(), 2);
        Ok(())
    }
}
