//! Labeled multidimensional datasets backed by NetCDF-4 files.
//!
//! This crate is the array layer underneath the perturbation pipeline. It
//! provides:
//!
//! - [`Dataset`] / [`Variable`]: named dimensions over `ndarray` data, with
//!   coordinate variables and attributes, plus [`TextVariable`]s carried
//!   through untouched
//! - [`storage`]: the on-disk type, fill value and packing of each variable
//! - [`ops`]: arithmetic that lines variables up by dimension name
//! - [`open_dataset`] / [`write_dataset`]: decoding and encoding through the
//!   native netcdf library (libnetcdf + HDF5)
//!
//! # System requirements
//!
//! `libhdf5-dev` and `libnetcdf-dev` must be installed.

pub mod dataset;
pub mod error;
mod native;
pub mod ops;
pub mod storage;

pub use dataset::{AttrValue, Dataset, TextContent, TextVariable, Variable};
pub use error::{DatasetError, DatasetResult};
pub use native::{
    open_dataset, open_dataset_subset, silence_hdf5_errors, write_dataset, Encoding, Precision,
};
pub use storage::{Storage, StorageType};
