//! Ensemble loading.
//!
//! Expands a glob pattern to the per-member files of one forecast hour,
//! opens them on the rayon pool and stacks them along a new leading member
//! dimension. Member `i` is the `i`-th file in sorted path order regardless
//! of which file finished opening first.

use std::path::{Path, PathBuf};

use ndarray::{ArrayViewD, Axis};
use netcdf_dataset::{open_dataset_subset, Dataset, DatasetError};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::{PerturbationError, Result};
use crate::MEMBER_DIM;

/// Expand a glob pattern to a sorted list of files.
pub fn expand_pattern(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern).map_err(|e| PerturbationError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| {
            let path = e.path().to_path_buf();
            PerturbationError::io(path, e.into_error())
        })?;
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Load every member matched by `pattern`, restricted to `variables`.
pub fn load_ensemble<S: AsRef<str> + Sync>(pattern: &str, variables: &[S]) -> Result<Dataset> {
    let paths = expand_pattern(pattern)?;
    if paths.is_empty() {
        return Err(PerturbationError::EmptyEnsemble {
            pattern: pattern.to_string(),
        });
    }

    info!(
        pattern = %pattern,
        members = paths.len(),
        variables = variables.len(),
        "Loading ensemble"
    );

    let members = paths
        .par_iter()
        .map(|path| open_member(path, variables))
        .collect::<Result<Vec<Dataset>>>()?;

    stack_members(&paths, &members, variables)
}

/// Open one member file, keeping only the requested variables.
fn open_member<S: AsRef<str>>(path: &Path, variables: &[S]) -> Result<Dataset> {
    debug!(path = %path.display(), "Opening ensemble member");
    open_dataset_subset(path, variables).map_err(|e| match e {
        DatasetError::MissingVariable(variable) => PerturbationError::MissingVariable {
            location: path.display().to_string(),
            variable,
        },
        other => PerturbationError::dataset(path.display(), other),
    })
}

/// Concatenate aligned members along a new leading member dimension.
///
/// `paths[i]` names the file `members[i]` came from and is used for error
/// context only. Coordinate variables are taken from the first member and
/// must be identical in every other member.
pub fn stack_members<S: AsRef<str>>(
    paths: &[PathBuf],
    members: &[Dataset],
    variables: &[S],
) -> Result<Dataset> {
    let (first, rest) = members.split_first().ok_or_else(|| PerturbationError::EmptyEnsemble {
        pattern: String::new(),
    })?;

    for (path, member) in paths.iter().skip(1).zip(rest) {
        check_alignment(path, first, member, variables)?;
    }

    let mut ensemble = Dataset::new();
    ensemble.attributes = first.attributes.clone();

    for (name, var) in first.variables() {
        if first.is_coordinate(name) {
            ensemble
                .insert(name, var.clone())
                .map_err(|e| PerturbationError::dataset("ensemble", e))?;
        }
    }

    for name in variables {
        let name = name.as_ref();
        let template = first
            .variable(name)
            .ok_or_else(|| PerturbationError::MissingVariable {
                location: paths[0].display().to_string(),
                variable: name.to_string(),
            })?;

        let views: Vec<ArrayViewD<'_, f64>> = members
            .iter()
            .filter_map(|m| m.variable(name))
            .map(|v| v.data().view())
            .collect();
        let stacked = ndarray::stack(Axis(0), &views).map_err(|e| PerturbationError::Alignment {
            path: paths[0].clone(),
            detail: format!("cannot stack '{}': {}", name, e),
        })?;

        let dims = std::iter::once(MEMBER_DIM.to_string()).chain(template.dims().iter().cloned());
        let var = template
            .with_data(dims, stacked)
            .map_err(|e| PerturbationError::dataset("ensemble", e))?;
        ensemble
            .insert(name, var)
            .map_err(|e| PerturbationError::dataset("ensemble", e))?;
    }

    debug!(
        members = members.len(),
        variables = variables.len(),
        "Stacked ensemble members"
    );
    Ok(ensemble)
}

/// Check that `member` has the same layout and coordinates as `reference`.
fn check_alignment<S: AsRef<str>>(
    path: &Path,
    reference: &Dataset,
    member: &Dataset,
    variables: &[S],
) -> Result<()> {
    let misaligned = |detail: String| PerturbationError::Alignment {
        path: path.to_path_buf(),
        detail,
    };

    for name in variables {
        let name = name.as_ref();
        let (Some(expected), Some(found)) = (reference.variable(name), member.variable(name)) else {
            return Err(PerturbationError::MissingVariable {
                location: path.display().to_string(),
                variable: name.to_string(),
            });
        };
        if expected.dims() != found.dims() {
            return Err(misaligned(format!(
                "'{}' has dimensions {:?}, expected {:?}",
                name,
                found.dims(),
                expected.dims()
            )));
        }
        if expected.shape() != found.shape() {
            return Err(misaligned(format!(
                "'{}' has shape {:?}, expected {:?}",
                name,
                found.shape(),
                expected.shape()
            )));
        }
    }

    for (name, coord) in reference.variables() {
        if !reference.is_coordinate(name) {
            continue;
        }
        match member.variable(name) {
            Some(other) if other.data() == coord.data() => {}
            Some(_) => return Err(misaligned(format!("coordinate '{}' differs", name))),
            None => return Err(misaligned(format!("coordinate '{}' is missing", name))),
        }
    }

    Ok(())
}
