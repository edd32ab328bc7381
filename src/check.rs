use crate::bounds::BoundingBox;
use crate::comm::Communicator;
use crate::divide::PartSizes;
use crate::dot::{Dot, Weighting};
use crate::error::{RcbError, Result};

/// Rejects non-finite coordinates and negative or non-finite weights.
pub(crate) fn check_input(dots: &[Dot], weighting: Weighting) -> Result<()> {
    let wdim = match weighting {
        Weighting::Unit => 0,
        Weighting::Components(n) => n,
    };
    for dot in dots {
        if dot.coords.iter().any(|c| !c.is_finite()) {
            return Err(RcbError::GeometryCheck(format!(
                "dot {:?} has non-finite coordinates {:?}",
                dot.id, dot.coords
            )));
        }
        if let Some(w) = dot.weights[..wdim].iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(RcbError::GeometryCheck(format!("dot {:?} has invalid weight {}", dot.id, w)));
        }
    }
    Ok(())
}

/// Checks a finished partitioning. Collective.
///
/// Every local dot must lie inside `bbox`, the weight of every component must be
/// conserved, and every dot must carry a valid partition. The achieved imbalance
/// is logged but never fails the check.
pub(crate) fn check_output<C: Communicator>(
    comm: &C,
    dots: &[Dot],
    weighting: Weighting,
    bbox: &BoundingBox,
    weight_before: &[f64],
    sizes: &PartSizes,
) -> Result<()> {
    let num_parts = sizes.len();
    let outside = dots.iter().filter(|d| !bbox.contains(&d.coords)).count();
    let unassigned = dots.iter().filter(|d| d.part >= num_parts).count();
    let misplaced = comm.all_reduce_each(&[outside, unassigned], |a, b| a + b)?;
    let (outside, unassigned) = (misplaced[0], misplaced[1]);
    let weight_after = comm.sum(&weighting.sums(dots))?;

    let mut local_parts = vec![0.0; num_parts];
    for dot in dots.iter().filter(|d| d.part < num_parts) {
        local_parts[dot.part] += weighting.of(dot);
    }
    let part_weights = comm.sum(&local_parts)?;

    let total = weight_before.first().copied().unwrap_or(0.0);
    let size_total = sizes.sum(0..num_parts);
    let mut imbalance: f64 = 0.0;
    for (part, w) in part_weights.iter().enumerate() {
        let wanted = total * sizes.size(part) / size_total;
        if wanted > 0.0 { imbalance = imbalance.max(w / wanted); }
    }
    if comm.rank() == 0 {
        log::info!("RCB achieved imbalance {:.4} over {} partitions", imbalance, num_parts);
    }

    let mut problems = Vec::new();
    if outside > 0 {
        problems.push(format!("{} dots lie outside their sub-domain box", outside));
    }
    if unassigned > 0 {
        problems.push(format!("{} dots have no valid partition", unassigned));
    }
    for (i, (before, after)) in weight_before.iter().zip(&weight_after).enumerate() {
        if (before - after).abs() > 1e-9 * before.abs().max(1.0) {
            problems.push(format!("weight component {} changed from {} to {}", i, before, after));
        }
    }
    if problems.is_empty() {
        Ok(())
    } else {
        Err(RcbError::GeometryCheck(problems.join("; ")))
    }
}
