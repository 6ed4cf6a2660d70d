//! Entry point of boxing: validates an edge, reduces both hierarchies and
//! hands rank-1 edges to the builder chain.

use super::broadcast::BroadcastSubTaskGraphBuilder;
use super::builder::{BoxingEdge, BuildOutcome, SubTaskGraphBuilder, SubTaskGraphBuilderStatus};
use super::chain::ChainSubTaskGraphBuilder;
use super::collective::CollectiveBoxingSubTaskGraphBuilder;
use super::ctx::SubTaskGraphBuilderCtx;
use super::naive::{NaiveAllToAllSubTaskGraphBuilder, NaiveB2BSubTaskGraphBuilder};
use super::one_to_one::OneToOneSubTaskGraphBuilder;
use super::reduce::in_out_parallel_axes_reduce;
use super::slice_boxing::SliceBoxingSubTaskGraphBuilder;
use super::task::TaskId;
use crate::parallel::{BlobDesc, LogicalBlobId, ParallelDesc, ParallelDistribution, Shape};
use crate::utils::config::ResourceConfig;
use crate::utils::error::{HierflowError, Result};
use crate::utils::metrics;
use tracing::{info, warn};

/// One logical tensor edge to redistribute.
#[derive(Debug, Clone, Copy)]
pub struct BoxingRequest<'a> {
    /// One producer task per producer device, in parallel-id order.
    pub sorted_in_tasks: &'a [TaskId],
    pub in_parallel_desc: &'a ParallelDesc,
    pub out_parallel_desc: &'a ParallelDesc,
    pub lbi: &'a LogicalBlobId,
    pub logical_blob_desc: &'a BlobDesc,
    pub in_distribution: &'a ParallelDistribution,
    pub out_distribution: &'a ParallelDistribution,
    pub time_shape: &'a Shape,
}

/// Result of a successful boxing call.
#[derive(Debug, Clone)]
pub struct BoxingPlan {
    /// Task holding each consumer device's share, in parallel-id order.
    pub sorted_out_tasks: Vec<TaskId>,
    /// Control predecessors each consumer task must also wait for.
    pub sorted_ctrl_tasks: Vec<Vec<TaskId>>,
    /// Every task this call added to the graph.
    pub new_tasks: Vec<TaskId>,
    pub status: SubTaskGraphBuilderStatus,
}

pub struct HierarchicalSubTaskGraphBuilder {
    chain: ChainSubTaskGraphBuilder,
    resource: ResourceConfig,
}

impl HierarchicalSubTaskGraphBuilder {
    pub fn new(resource: &ResourceConfig) -> Self {
        let mut builders: Vec<Box<dyn SubTaskGraphBuilder>> = vec![
            Box::new(OneToOneSubTaskGraphBuilder),
            Box::new(BroadcastSubTaskGraphBuilder),
        ];
        if !resource.nccl_use_compute_stream {
            builders.push(Box::new(CollectiveBoxingSubTaskGraphBuilder));
        }
        builders.push(Box::new(SliceBoxingSubTaskGraphBuilder));
        builders.push(Box::new(NaiveB2BSubTaskGraphBuilder));
        builders.push(Box::new(NaiveAllToAllSubTaskGraphBuilder));

        Self {
            chain: ChainSubTaskGraphBuilder::new(builders),
            resource: resource.clone(),
        }
    }

    /// Member builders in the order they are tried.
    pub fn builder_names(&self) -> Vec<&'static str> {
        self.chain.builder_names()
    }

    pub fn build(&self, ctx: &mut SubTaskGraphBuilderCtx, request: &BoxingRequest<'_>) -> Result<BoxingPlan> {
        self.validate(ctx, request)?;

        let ((in_desc, in_dist), (out_desc, out_dist)) = in_out_parallel_axes_reduce(
            request.in_parallel_desc,
            request.in_distribution,
            request.out_parallel_desc,
            request.out_distribution,
        )?;

        if in_dist.len() != 1 || out_dist.len() != 1 {
            return Err(self.not_supported(
                request,
                format!("reduced distributions {} -> {} span more than one axis", in_dist, out_dist),
            ));
        }

        let edge = BoxingEdge {
            sorted_in_tasks: request.sorted_in_tasks,
            in_parallel_desc: &in_desc,
            out_parallel_desc: &out_desc,
            lbi: request.lbi,
            logical_blob_desc: request.logical_blob_desc,
            in_sbp: in_dist.sbp_parallel(0),
            out_sbp: out_dist.sbp_parallel(0),
            time_shape: request.time_shape,
        };

        let first_new = ctx.task_graph().next_id();
        let graph = match self.chain.build(ctx, &edge)? {
            BuildOutcome::Built(graph) => graph,
            BuildOutcome::Declined => {
                return Err(self.not_supported(request, "every builder declined".to_string()));
            }
        };
        let new_tasks = ctx.task_graph().ids_from(first_new);

        metrics::record_boxing_build(&graph.status.builder_name, new_tasks.len());
        info!(
            lbi = %request.lbi,
            builder = %graph.status.builder_name,
            comment = %graph.status.comment,
            tasks_created = new_tasks.len(),
            "Boxing plan built"
        );

        Ok(BoxingPlan {
            sorted_out_tasks: graph.sorted_out_tasks,
            sorted_ctrl_tasks: graph.sorted_ctrl_tasks,
            new_tasks,
            status: graph.status,
        })
    }

    fn validate(&self, ctx: &SubTaskGraphBuilderCtx, request: &BoxingRequest<'_>) -> Result<()> {
        let in_num = request.in_parallel_desc.parallel_num();
        if request.sorted_in_tasks.len() != in_num {
            return Err(HierflowError::MalformedDescriptor(format!(
                "{} producer tasks given for {} producer devices",
                request.sorted_in_tasks.len(),
                in_num
            )));
        }
        if let Some(id) = request.sorted_in_tasks.iter().find(|id| !ctx.task_graph().contains(**id)) {
            return Err(HierflowError::MalformedDescriptor(format!(
                "producer task {} is not in the task graph",
                id
            )));
        }

        let shape = &request.logical_blob_desc.shape;
        for (desc, dist) in [
            (request.in_parallel_desc, request.in_distribution),
            (request.out_parallel_desc, request.out_distribution),
        ] {
            if dist.len() != desc.hierarchy().num_axes() {
                return Err(HierflowError::MalformedDescriptor(format!(
                    "distribution {} does not match hierarchy {} of {}",
                    dist,
                    desc.hierarchy(),
                    desc
                )));
            }
            let bad_axis = dist
                .as_slice()
                .iter()
                .filter_map(|sbp| sbp.split_axis())
                .find(|&axis| axis >= shape.num_axes());
            if let Some(axis) = bad_axis {
                return Err(HierflowError::MalformedDescriptor(format!(
                    "split axis {} out of range for shape {}",
                    axis, shape
                )));
            }
            self.resource.check_placement(desc)?;
        }
        Ok(())
    }

    fn not_supported(&self, request: &BoxingRequest<'_>, reason: String) -> HierflowError {
        let src = format!("{}{}", request.in_parallel_desc, request.in_distribution);
        let dst = format!("{}{}", request.out_parallel_desc, request.out_distribution);
        warn!(lbi = %request.lbi, src = %src, dst = %dst, reason = %reason, "Boxing not supported");
        metrics::record_boxing_unsupported();
        HierflowError::BoxingNotSupported {
            lbi: request.lbi.to_string(),
            src,
            dst,
            reason,
        }
    }
}
