//! Error types for dataset operations.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for dataset operations.
pub type DatasetResult<T> = Result<T, DatasetError>;

/// Error types for labeled datasets and their NetCDF encoding.
#[derive(Error, Debug)]
pub enum DatasetError {
    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The NetCDF library rejected an operation on a file
    #[error("NetCDF error in {path}: {message}")]
    NetCdf { path: PathBuf, message: String },

    /// Missing required dimension or attribute
    #[error("Missing required data: {0}")]
    MissingData(String),

    /// A requested variable does not exist
    #[error("Missing variable: {0}")]
    MissingVariable(String),

    /// A variable's shape disagrees with its dimension names or with the
    /// lengths already registered for those dimensions
    #[error("dimension '{dimension}' of '{variable}' has length {found}, expected {expected}")]
    ShapeMismatch {
        variable: String,
        dimension: String,
        expected: usize,
        found: usize,
    },

    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),
}

impl DatasetError {
    /// Wrap a NetCDF library error with the file it concerns.
    pub fn netcdf(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::NetCdf {
            path: path.into(),
            message: err.to_string(),
        }
    }

    /// Create a ShapeMismatch error.
    pub fn shape_mismatch(
        variable: impl Into<String>,
        dimension: impl Into<String>,
        expected: usize,
        found: usize,
    ) -> Self {
        Self::ShapeMismatch {
            variable: variable.into(),
            dimension: dimension.into(),
            expected,
            found,
        }
    }
}
