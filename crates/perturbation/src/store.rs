//! Persistence of perturbation datasets.
//!
//! A saved perturbation file is never overwritten: the existence check runs
//! before anything is written, and the data goes to a temporary file in the
//! destination directory that is only moved into place if the destination is
//! still free.

use std::io::ErrorKind;
use std::path::Path;

use netcdf_dataset::{open_dataset, write_dataset, Dataset, DatasetError, Encoding};
use tracing::{debug, info};

use crate::error::{PerturbationError, Result};
use crate::MEMBER_DIM;

/// Save a perturbation dataset to a new file at `path`.
pub fn save(perturbations: &Dataset, path: &Path) -> Result<()> {
    if path.exists() {
        return Err(PerturbationError::OverwriteRefused(path.to_path_buf()));
    }

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| PerturbationError::io(dir, e))?;

    let staging = tempfile::Builder::new()
        .prefix(".perturbations")
        .suffix(".nc.tmp")
        .tempfile_in(dir)
        .map_err(|e| PerturbationError::io(dir, e))?;
    debug!(
        staging = %staging.path().display(),
        target = %path.display(),
        "Writing perturbations to staging file"
    );

    write_dataset(perturbations, staging.path(), &Encoding::exact())
        .map_err(|e| PerturbationError::dataset(path.display(), e))?;

    staging.persist_noclobber(path).map_err(|e| {
        if e.error.kind() == ErrorKind::AlreadyExists {
            PerturbationError::OverwriteRefused(path.to_path_buf())
        } else {
            PerturbationError::io(path, e.error)
        }
    })?;

    info!(
        path = %path.display(),
        variables = perturbations.data_variables().count(),
        "Saved perturbations"
    );
    Ok(())
}

/// Load a perturbation dataset saved by [`save`].
pub fn load(path: &Path) -> Result<Dataset> {
    if !path.exists() {
        return Err(PerturbationError::NotFound(path.to_path_buf()));
    }

    let location = path.display().to_string();
    let perturbations = open_dataset(path).map_err(|e| match e {
        DatasetError::IoError(source) => PerturbationError::io(path, source),
        other => PerturbationError::Format {
            location: location.clone(),
            detail: other.to_string(),
        },
    })?;

    let has_members = perturbations
        .data_variables()
        .any(|(_, var)| var.axis_of(MEMBER_DIM).is_some());
    if !has_members {
        return Err(PerturbationError::Format {
            location,
            detail: format!("no data variable has a '{}' dimension", MEMBER_DIM),
        });
    }

    info!(
        path = %path.display(),
        members = perturbations.dim_len(MEMBER_DIM).unwrap_or(0),
        "Loaded perturbations"
    );
    Ok(perturbations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existing_file_refused_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pert.nc");
        std::fs::write(&path, b"keep me").unwrap();

        let err = save(&Dataset::new(), &path).unwrap_err();
        assert!(matches!(err, PerturbationError::OverwriteRefused(ref p) if p == &path));
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me");
        // no staging file left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.nc")).unwrap_err();
        assert!(matches!(err, PerturbationError::NotFound(_)));
    }

    #[test]
    fn test_load_garbage_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.nc");
        std::fs::write(&path, b"definitely not netcdf").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, PerturbationError::Format { .. }), "{}", err);
    }
}
