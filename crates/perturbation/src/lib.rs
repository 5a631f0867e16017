//! Ensemble perturbation computation and reconstitution.
//!
//! Computes each ensemble member's deviation from the ensemble mean for a
//! group of model state variables, optionally saves that perturbation set,
//! and adds it back onto a base state to produce one full-state file per
//! member.
//!
//! # Architecture
//!
//! - [`groups`]: which variables belong to `atmo`, `bndy` and `sfc`
//! - [`loader`]: member files matched by a glob, stacked along [`MEMBER_DIM`]
//! - [`engine`]: member minus ensemble mean
//! - [`store`]: no-overwrite save and load of perturbation files
//! - [`reconstitute`]: base state plus one member's perturbations
//! - [`writer`]: compressed member output
//! - [`pipeline`]: the per-forecast-hour driver tying these together

pub mod engine;
pub mod error;
pub mod groups;
pub mod loader;
pub mod pipeline;
pub mod plan;
pub mod reconstitute;
pub mod store;
mod timing;
pub mod writer;

/// Name of the ensemble member dimension.
pub const MEMBER_DIM: &str = "ens";

// Re-exports
pub use engine::deviate;
pub use error::{PerturbationError, Result};
pub use groups::{resolve, VariableGroup};
pub use loader::load_ensemble;
pub use pipeline::{
    HourOutcome, HourReport, Pipeline, PipelineConfig, PerturbationSource, RunSummary,
};
pub use plan::{expand_forecast_hours, render_template, TemplateFields};
pub use reconstitute::{reconstitute, Reconstitutor};
pub use timing::Stopwatch;
pub use writer::{OutputWriter, WriterConfig};
