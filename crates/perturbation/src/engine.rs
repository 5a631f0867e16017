//! Perturbation engine: each member's deviation from the ensemble mean.

use ndarray::{ArrayD, Axis, Zip};
use netcdf_dataset::{Dataset, Variable};
use tracing::{debug, trace};

use crate::error::{PerturbationError, Result};
use crate::MEMBER_DIM;

/// Replace every member variable with member minus ensemble mean.
///
/// Coordinate variables and data variables without the member dimension are
/// carried over unchanged. A NaN in any member contaminates the mean at that
/// point, and so the deviation of every member there.
pub fn deviate(ensemble: &Dataset) -> Result<Dataset> {
    let members = ensemble
        .dim_len(MEMBER_DIM)
        .ok_or_else(|| PerturbationError::Format {
            location: "ensemble dataset".to_string(),
            detail: format!("no '{}' dimension", MEMBER_DIM),
        })?;
    if members == 0 {
        return Err(PerturbationError::EmptyEnsemble {
            pattern: "ensemble dataset".to_string(),
        });
    }

    let mut perturbations = Dataset::new();
    perturbations.attributes = ensemble.attributes.clone();

    for (name, var) in ensemble.variables() {
        let out = match var.axis_of(MEMBER_DIM) {
            Some(axis) if !ensemble.is_coordinate(name) => {
                trace!(variable = name, members = members, "Computing deviations");
                let deviations = deviations(var.data(), Axis(axis));
                let mut out = var
                    .with_data(var.dims().iter().cloned(), deviations)
                    .map_err(|e| PerturbationError::dataset(name, e))?;
                // deviations do not fit the members' packing
                out.storage = None;
                out
            }
            _ => var.clone(),
        };
        perturbations
            .insert(name, out)
            .map_err(|e| PerturbationError::dataset("perturbation dataset", e))?;
    }

    debug!(
        members = members,
        variables = perturbations.data_variables().count(),
        "Computed ensemble perturbations"
    );
    Ok(perturbations)
}

/// Mean over `axis`, anchored on the first lane.
///
/// Computed as `m0 + sum(mi - m0) / n`, which is exactly `m0` when every
/// lane equals `m0`. Where `m0` is infinite or NaN the plain mean
/// `sum(mi) / n` is used instead, so `[inf, 1]` averages to `inf`.
pub fn ensemble_mean(data: &ArrayD<f64>, axis: Axis) -> ArrayD<f64> {
    let n = data.len_of(axis) as f64;
    let anchor = data.index_axis(axis, 0).to_owned();
    let mut offsets = ArrayD::<f64>::zeros(anchor.raw_dim());
    for lane in data.axis_iter(axis).skip(1) {
        offsets += &(&lane - &anchor);
    }
    let mut mean = &anchor + &(offsets / n);

    if anchor.iter().any(|a| !a.is_finite()) {
        let plain = data.sum_axis(axis) / n;
        Zip::from(&mut mean)
            .and(&anchor)
            .and(&plain)
            .for_each(|m, &a, &p| {
                if !a.is_finite() {
                    *m = p;
                }
            });
    }
    mean
}

fn deviations(data: &ArrayD<f64>, axis: Axis) -> ArrayD<f64> {
    let mean = ensemble_mean(data, axis).insert_axis(axis);
    data - &mean
}

/// Mean of a perturbation variable over the member axis.
pub fn member_mean(var: &Variable) -> Option<ArrayD<f64>> {
    let axis = var.axis_of(MEMBER_DIM)?;
    var.data().mean_axis(Axis(axis))
}
