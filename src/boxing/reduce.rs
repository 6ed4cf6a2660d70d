//! Hierarchy reduction.
//!
//! Adjacent hierarchy axes carrying the same distribution describe the same
//! layout as a single axis whose extent is their product: `[2, 2]` with
//! `[S(0), S(0)]` is `[4]` with `[S(0)]`. Reducing first lets the rank-1
//! builders handle more edges.

use crate::parallel::{ParallelDesc, ParallelDistribution, Shape};
use crate::utils::error::{HierflowError, Result};

pub type Placement = (ParallelDesc, ParallelDistribution);

fn check_rank(parallel_desc: &ParallelDesc, distribution: &ParallelDistribution) -> Result<()> {
    if distribution.len() != parallel_desc.hierarchy().num_axes() {
        return Err(HierflowError::MalformedDescriptor(format!(
            "distribution {} does not match hierarchy {} of {}",
            distribution,
            parallel_desc.hierarchy(),
            parallel_desc
        )));
    }
    Ok(())
}

/// Merge each axis into the previous one while its distribution repeats.
pub fn parallel_axes_reduce(
    parallel_desc: &ParallelDesc,
    distribution: &ParallelDistribution,
) -> Result<Placement> {
    check_rank(parallel_desc, distribution)?;
    let hierarchy = parallel_desc.hierarchy().dims();
    if hierarchy.len() == 1 {
        return Ok((parallel_desc.clone(), distribution.clone()));
    }

    let mut dims = vec![hierarchy[0]];
    let mut reduced = ParallelDistribution::new(vec![distribution.sbp_parallel(0)]);
    for axis in 1..hierarchy.len() {
        let sbp = distribution.sbp_parallel(axis);
        if sbp == distribution.sbp_parallel(axis - 1) {
            if let Some(last) = dims.last_mut() {
                *last *= hierarchy[axis];
            }
        } else {
            dims.push(hierarchy[axis]);
            reduced.push(sbp);
        }
    }
    Ok((parallel_desc.with_hierarchy(Shape::new(dims))?, reduced))
}

/// Reduce producer and consumer together: an axis merges only when it
/// repeats on both sides, so the results keep equal rank and axis `k` of one
/// still lines up with axis `k` of the other.
pub fn collaborative_parallel_axes_reduce(
    in_parallel_desc: &ParallelDesc,
    in_distribution: &ParallelDistribution,
    out_parallel_desc: &ParallelDesc,
    out_distribution: &ParallelDistribution,
) -> Result<(Placement, Placement)> {
    check_rank(in_parallel_desc, in_distribution)?;
    check_rank(out_parallel_desc, out_distribution)?;
    let in_hierarchy = in_parallel_desc.hierarchy().dims();
    let out_hierarchy = out_parallel_desc.hierarchy().dims();
    if in_hierarchy.len() != out_hierarchy.len() {
        return Err(HierflowError::MalformedDescriptor(format!(
            "cannot reduce {} and {} together: hierarchy ranks differ",
            in_parallel_desc, out_parallel_desc
        )));
    }

    let mut in_dims = vec![in_hierarchy[0]];
    let mut out_dims = vec![out_hierarchy[0]];
    let mut in_reduced = ParallelDistribution::new(vec![in_distribution.sbp_parallel(0)]);
    let mut out_reduced = ParallelDistribution::new(vec![out_distribution.sbp_parallel(0)]);
    for axis in 1..in_hierarchy.len() {
        let in_sbp = in_distribution.sbp_parallel(axis);
        let out_sbp = out_distribution.sbp_parallel(axis);
        let merge = in_sbp == in_distribution.sbp_parallel(axis - 1)
            && out_sbp == out_distribution.sbp_parallel(axis - 1);
        if merge {
            if let (Some(in_last), Some(out_last)) = (in_dims.last_mut(), out_dims.last_mut()) {
                *in_last *= in_hierarchy[axis];
                *out_last *= out_hierarchy[axis];
            }
        } else {
            in_dims.push(in_hierarchy[axis]);
            out_dims.push(out_hierarchy[axis]);
            in_reduced.push(in_sbp);
            out_reduced.push(out_sbp);
        }
    }

    Ok((
        (in_parallel_desc.with_hierarchy(Shape::new(in_dims))?, in_reduced),
        (out_parallel_desc.with_hierarchy(Shape::new(out_dims))?, out_reduced),
    ))
}

/// Reduce a producer/consumer pair, jointly when their ranks agree and
/// independently otherwise. Two rank-1 sides come back unchanged.
pub fn in_out_parallel_axes_reduce(
    in_parallel_desc: &ParallelDesc,
    in_distribution: &ParallelDistribution,
    out_parallel_desc: &ParallelDesc,
    out_distribution: &ParallelDistribution,
) -> Result<(Placement, Placement)> {
    let in_rank = in_parallel_desc.hierarchy().num_axes();
    let out_rank = out_parallel_desc.hierarchy().num_axes();
    if in_rank == 1 && out_rank == 1 {
        check_rank(in_parallel_desc, in_distribution)?;
        check_rank(out_parallel_desc, out_distribution)?;
        return Ok((
            (in_parallel_desc.clone(), in_distribution.clone()),
            (out_parallel_desc.clone(), out_distribution.clone()),
        ));
    }
    if in_rank != out_rank {
        return Ok((
            parallel_axes_reduce(in_parallel_desc, in_distribution)?,
            parallel_axes_reduce(out_parallel_desc, out_distribution)?,
        ));
    }
    collaborative_parallel_axes_reduce(in_parallel_desc, in_distribution, out_parallel_desc, out_distribution)
}
