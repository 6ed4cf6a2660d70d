use super::builder::{BoxingEdge, BuildOutcome, SubTaskGraphBuilder};
use super::ctx::SubTaskGraphBuilderCtx;
use crate::utils::error::Result;
use tracing::debug;

/// Tries each member in order and keeps the first plan produced.
///
/// Declines only if every member declines. Tasks the members create carry
/// the edge's time shape.
pub struct ChainSubTaskGraphBuilder {
    builders: Vec<Box<dyn SubTaskGraphBuilder>>,
}

impl ChainSubTaskGraphBuilder {
    pub fn new(builders: Vec<Box<dyn SubTaskGraphBuilder>>) -> Self {
        Self { builders }
    }

    pub fn builder_names(&self) -> Vec<&'static str> {
        self.builders.iter().map(|b| b.name()).collect()
    }
}

impl SubTaskGraphBuilder for ChainSubTaskGraphBuilder {
    fn name(&self) -> &'static str {
        "ChainSubTaskGraphBuilder"
    }

    fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, edge: &BoxingEdge<'_>) -> Result<BuildOutcome> {
        for builder in &self.builders {
            match ctx.with_time_shape(edge.time_shape, |ctx| builder.build(ctx, edge))? {
                BuildOutcome::Built(graph) => return Ok(BuildOutcome::Built(graph)),
                BuildOutcome::Declined => {
                    debug!(
                        lbi = %edge.lbi,
                        builder = builder.name(),
                        src = %edge.in_sbp,
                        dst = %edge.out_sbp,
                        "Builder declined"
                    );
                }
            }
        }
        Ok(BuildOutcome::Declined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxing::builder::EdgeFixture;
    use crate::boxing::naive::NaiveAllToAllSubTaskGraphBuilder;
    use crate::boxing::one_to_one::OneToOneSubTaskGraphBuilder;
    use crate::parallel::{SbpParallel, Shape};

    #[test]
    fn test_earliest_applicable_wins() -> Result<()> {
        let chain = ChainSubTaskGraphBuilder::new(vec![
            Box::new(OneToOneSubTaskGraphBuilder),
            Box::new(NaiveAllToAllSubTaskGraphBuilder),
        ]);
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0"], SbpParallel::Broadcast),
            ("gpu", &["0:0"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = chain.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        assert_eq!(graph.status.builder_name, "OneToOneSubTaskGraphBuilder");
        Ok(())
    }

    #[test]
    fn test_falls_through_declines() -> Result<()> {
        let chain = ChainSubTaskGraphBuilder::new(vec![
            Box::new(OneToOneSubTaskGraphBuilder),
            Box::new(NaiveAllToAllSubTaskGraphBuilder),
        ]);
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::PartialSum),
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            vec![4],
        )?;
        let BuildOutcome::Built(graph) = chain.build(&mut ctx, &fixture.edge())? else {
            panic!("expected a plan");
        };
        assert_eq!(graph.status.builder_name, "NaiveAllToAllSubTaskGraphBuilder");
        Ok(())
    }

    #[test]
    fn test_members_stamp_edge_time_shape() -> Result<()> {
        let chain = ChainSubTaskGraphBuilder::new(vec![Box::new(NaiveAllToAllSubTaskGraphBuilder)]);
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("gpu", &["0:0-1"], SbpParallel::Split(0)),
            ("gpu", &["1:0-1"], SbpParallel::Broadcast),
            vec![4],
        )?;
        let producers = ctx.task_graph().len();
        let time_shape = Shape::new(vec![4, 2]);
        let edge = BoxingEdge { time_shape: &time_shape, ..fixture.edge() };

        assert!(matches!(chain.build(&mut ctx, &edge)?, BuildOutcome::Built(_)));
        let nodes = &ctx.task_graph().nodes()[producers..];
        assert!(!nodes.is_empty());
        assert!(nodes.iter().all(|n| n.time_shape == time_shape));
        Ok(())
    }

    #[test]
    fn test_empty_chain_declines() -> Result<()> {
        let chain = ChainSubTaskGraphBuilder::new(Vec::new());
        let mut ctx = SubTaskGraphBuilderCtx::new();
        let fixture = EdgeFixture::new(
            &mut ctx,
            ("cpu", &["0:0"], SbpParallel::Broadcast),
            ("cpu", &["0:0"], SbpParallel::Broadcast),
            vec![4],
        )?;
        assert!(matches!(chain.build(&mut ctx, &fixture.edge())?, BuildOutcome::Declined));
        Ok(())
    }
}
