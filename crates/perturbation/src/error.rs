//! Error types for the perturbation crate.

use std::path::PathBuf;

use netcdf_dataset::DatasetError;
use thiserror::Error;

/// Errors that can occur while computing or applying perturbations.
#[derive(Error, Debug)]
pub enum PerturbationError {
    #[error("unknown variable group '{0}' (expected one of atmo, bndy, sfc)")]
    UnknownGroup(String),

    #[error("no ensemble members matched '{pattern}'")]
    EmptyEnsemble { pattern: String },

    #[error("invalid path pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("member file {} is not aligned with the ensemble: {detail}", .path.display())]
    Alignment { path: PathBuf, detail: String },

    #[error("variable '{variable}' not found in {location}")]
    MissingVariable { location: String, variable: String },

    #[error("refusing to overwrite existing perturbation file {}", .0.display())]
    OverwriteRefused(PathBuf),

    #[error("{} not found", .0.display())]
    NotFound(PathBuf),

    #[error("{location} is not a perturbation dataset: {detail}")]
    Format { location: String, detail: String },

    #[error("member index {index} out of range for an ensemble of {count} members")]
    MemberIndex { index: usize, count: usize },

    #[error(
        "cannot add perturbation of '{variable}' to base state: dimension '{dimension}' \
         has length {base} in the base state and {perturbation} in the perturbation"
    )]
    ShapeMismatch {
        variable: String,
        dimension: String,
        base: usize,
        perturbation: usize,
    },

    #[error(
        "no source of ensemble perturbations for forecast hour {fhr}: \
         configure an ensemble input pattern or a perturbation file"
    )]
    NoPerturbationSource { fhr: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("{location}: {source}")]
    Dataset {
        location: String,
        #[source]
        source: DatasetError,
    },

    #[error("I/O error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("forecast hour {fhr}{}: {source}", member_suffix(.member))]
    HourFailed {
        fhr: u32,
        member: Option<usize>,
        #[source]
        source: Box<PerturbationError>,
    },
}

fn member_suffix(member: &Option<usize>) -> String {
    member.map(|m| format!(", member {}", m)).unwrap_or_default()
}

impl PerturbationError {
    /// Create a Dataset error for a file or an in-memory dataset.
    pub fn dataset(location: impl std::fmt::Display, source: DatasetError) -> Self {
        Self::Dataset {
            location: location.to_string(),
            source,
        }
    }

    /// Create an Io error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Attach forecast hour context, unless it is already present.
    pub fn in_hour(self, fhr: u32) -> Self {
        match self {
            Self::HourFailed { .. } | Self::NoPerturbationSource { .. } => self,
            other => Self::HourFailed {
                fhr,
                member: None,
                source: Box::new(other),
            },
        }
    }

    /// Attach forecast hour and member index context.
    pub fn in_member(self, fhr: u32, member: usize) -> Self {
        Self::HourFailed {
            fhr,
            member: Some(member),
            source: Box::new(self),
        }
    }

    /// The error with hour/member context stripped.
    pub fn root(&self) -> &Self {
        match self {
            Self::HourFailed { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type for perturbation operations.
pub type Result<T> = std::result::Result<T, PerturbationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hour_context_is_added_once() {
        let err = PerturbationError::MemberIndex { index: 5, count: 3 }
            .in_member(6, 5)
            .in_hour(6);
        let msg = err.to_string();
        assert!(msg.starts_with("forecast hour 6, member 5:"), "{}", msg);
        assert!(matches!(err.root(), PerturbationError::MemberIndex { index: 5, .. }));
    }

    #[test]
    fn test_no_source_is_not_wrapped() {
        let err = PerturbationError::NoPerturbationSource { fhr: 3 }.in_hour(3);
        assert!(matches!(err, PerturbationError::NoPerturbationSource { fhr: 3 }));
    }
}
