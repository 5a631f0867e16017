//! Per-forecast-hour pipeline driver.
//!
//! For every forecast hour the driver obtains a perturbation dataset (from
//! the ensemble members or from a saved perturbation file), optionally
//! persists it, and then writes one reconstituted state per member when both
//! a base state and a member filename template are configured.

use std::path::{Path, PathBuf};
use std::time::Duration;

use netcdf_dataset::{open_dataset, Dataset};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::engine::deviate;
use crate::error::{PerturbationError, Result};
use crate::groups::VariableGroup;
use crate::loader::load_ensemble;
use crate::plan::{render_template, TemplateFields};
use crate::reconstitute::Reconstitutor;
use crate::store;
use crate::timing::Stopwatch;
use crate::writer::{OutputWriter, WriterConfig};

/// Settings for a perturbation run.
///
/// Path settings are templates: `{fhr}` is replaced by the forecast hour and,
/// in `output_dir` and `member_template`, `{mem}` by the 1-based member
/// number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Variable group to perturb
    pub group: VariableGroup,

    /// Glob pattern matching the ensemble member files of one hour
    pub ensemble_pattern: Option<String>,

    /// Perturbation file, read when no ensemble pattern is set and written
    /// when `write_perturbations` is set
    pub perturbation_file: Option<String>,

    /// Save the perturbations computed from the ensemble
    #[serde(default)]
    pub write_perturbations: bool,

    /// Base state the perturbations are added to
    pub base_state: Option<String>,

    /// Member output filename
    pub member_template: Option<String>,

    /// Member output directory
    pub output_dir: String,

    #[serde(default)]
    pub writer: WriterConfig,
}

/// Where an hour's perturbations came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerturbationSource {
    Ensemble,
    File,
}

/// What happened for one processed forecast hour.
#[derive(Debug, Clone)]
pub struct HourReport {
    pub fhr: u32,
    pub source: PerturbationSource,
    pub members: usize,
    /// Perturbation file written this hour, if any
    pub saved_perturbations: Option<PathBuf>,
    pub member_files: Vec<PathBuf>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum HourOutcome {
    Processed(HourReport),
    Skipped { fhr: u32, reason: String },
}

impl HourOutcome {
    pub fn fhr(&self) -> u32 {
        match self {
            Self::Processed(report) => report.fhr,
            Self::Skipped { fhr, .. } => *fhr,
        }
    }
}

/// Result of a complete run, in forecast hour order.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub hours: Vec<HourOutcome>,
}

impl RunSummary {
    pub fn processed(&self) -> impl Iterator<Item = &HourReport> {
        self.hours.iter().filter_map(|h| match h {
            HourOutcome::Processed(report) => Some(report),
            HourOutcome::Skipped { .. } => None,
        })
    }

    pub fn skipped_hours(&self) -> Vec<u32> {
        self.hours
            .iter()
            .filter(|h| matches!(h, HourOutcome::Skipped { .. }))
            .map(HourOutcome::fhr)
            .collect()
    }

    pub fn member_files_written(&self) -> usize {
        self.processed().map(|r| r.member_files.len()).sum()
    }

    pub fn perturbation_files_written(&self) -> usize {
        self.processed()
            .filter(|r| r.saved_perturbations.is_some())
            .count()
    }
}

/// Sequences loading, perturbation, persistence and reconstitution.
pub struct Pipeline {
    config: PipelineConfig,
    variables: Vec<String>,
    writer: OutputWriter,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let variables = config.group.variables();
        let writer = OutputWriter::new(&config.writer)?;
        Ok(Self {
            config,
            variables,
            writer,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Variables perturbed in this run.
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    /// Rendered perturbation file path for `fhr`.
    pub fn perturbation_path(&self, fhr: u32) -> Option<PathBuf> {
        self.config
            .perturbation_file
            .as_deref()
            .map(|t| PathBuf::from(render_template(t, TemplateFields::hour(fhr))))
    }

    /// Output path for member `index` (0-based) at `fhr`.
    pub fn member_path(&self, fhr: u32, index: usize) -> Option<PathBuf> {
        let template = self.config.member_template.as_deref()?;
        let fields = TemplateFields::member(fhr, index);
        let dir = PathBuf::from(render_template(&self.config.output_dir, fields));
        Some(dir.join(render_template(template, fields)))
    }

    /// Refuse the run if it would have to overwrite a perturbation file.
    pub fn preflight(&self, hours: &[u32]) -> Result<()> {
        if !self.config.write_perturbations || self.config.ensemble_pattern.is_none() {
            return Ok(());
        }
        for &fhr in hours {
            if let Some(path) = self.perturbation_path(fhr) {
                if path.exists() {
                    return Err(PerturbationError::OverwriteRefused(path).in_hour(fhr));
                }
            }
        }
        Ok(())
    }

    /// Process every hour in order.
    ///
    /// [`Pipeline::preflight`] runs first, so a refused perturbation file
    /// for any hour stops the run before anything is written. An hour
    /// without a perturbation source is logged and skipped. Any other
    /// failure stops the run and is returned with its forecast hour.
    pub fn run(&self, hours: &[u32]) -> Result<RunSummary> {
        self.preflight(hours)?;
        let mut summary = RunSummary::default();

        for &fhr in hours {
            match self.process_hour(fhr) {
                Ok(report) => summary.hours.push(HourOutcome::Processed(report)),
                Err(e @ PerturbationError::NoPerturbationSource { .. }) => {
                    warn!(fhr = fhr, error = %e, "Skipping forecast hour");
                    summary.hours.push(HourOutcome::Skipped {
                        fhr,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e.in_hour(fhr)),
            }
        }

        info!(
            hours = hours.len(),
            processed = summary.processed().count(),
            skipped = summary.skipped_hours().len(),
            member_files = summary.member_files_written(),
            "Perturbation run complete"
        );
        Ok(summary)
    }

    /// Run all stages for a single forecast hour.
    #[instrument(skip(self), fields(group = %self.config.group))]
    pub fn process_hour(&self, fhr: u32) -> Result<HourReport> {
        let watch = Stopwatch::start("forecast hour", Some(fhr));

        let (perturbations, source) = self.obtain_perturbations(fhr)?;
        let members = perturbations.dim_len(crate::MEMBER_DIM).unwrap_or(0);

        let saved_perturbations = self.save_perturbations(fhr, &perturbations, source)?;

        let member_files = match self.config.base_state.as_deref() {
            Some(base) if self.config.member_template.is_some() => {
                let base_path = PathBuf::from(render_template(base, TemplateFields::hour(fhr)));
                self.write_members(fhr, &perturbations, &base_path)?
            }
            _ => {
                debug!(fhr = fhr, "Base state or member template not set, no member files");
                Vec::new()
            }
        };

        Ok(HourReport {
            fhr,
            source,
            members,
            saved_perturbations,
            member_files,
            elapsed: watch.finish(),
        })
    }

    fn obtain_perturbations(&self, fhr: u32) -> Result<(Dataset, PerturbationSource)> {
        if let Some(pattern) = self.config.ensemble_pattern.as_deref() {
            let pattern = render_template(pattern, TemplateFields::hour(fhr));
            let ensemble = load_ensemble(&pattern, &self.variables)?;
            let perturbations = deviate(&ensemble)?;
            return Ok((perturbations, PerturbationSource::Ensemble));
        }

        if let Some(path) = self.perturbation_path(fhr) {
            let perturbations = store::load(&path)?;
            return Ok((perturbations, PerturbationSource::File));
        }

        Err(PerturbationError::NoPerturbationSource { fhr })
    }

    fn save_perturbations(
        &self,
        fhr: u32,
        perturbations: &Dataset,
        source: PerturbationSource,
    ) -> Result<Option<PathBuf>> {
        if !self.config.write_perturbations {
            return Ok(None);
        }
        let Some(path) = self.perturbation_path(fhr) else {
            return Ok(None);
        };
        if source == PerturbationSource::File {
            debug!(path = %path.display(), "Perturbations were read from this file, not saving");
            return Ok(None);
        }

        store::save(perturbations, &path)?;
        Ok(Some(path))
    }

    fn write_members(
        &self,
        fhr: u32,
        perturbations: &Dataset,
        base_path: &Path,
    ) -> Result<Vec<PathBuf>> {
        if !base_path.exists() {
            return Err(PerturbationError::NotFound(base_path.to_path_buf()));
        }
        let base = open_dataset(base_path)
            .map_err(|e| PerturbationError::dataset(base_path.display(), e))?;

        let reconstitutor = Reconstitutor::new(perturbations, &base, &self.variables)?;
        let mut written = Vec::with_capacity(reconstitutor.member_count());

        for index in 0..reconstitutor.member_count() {
            let Some(path) = self.member_path(fhr, index) else {
                break;
            };
            debug!(fhr = fhr, member = index + 1, "Preparing member");

            let state = reconstitutor
                .member(index)
                .map_err(|e| e.in_member(fhr, index))?;
            self.writer
                .write(&state, &path)
                .map_err(|e| e.in_member(fhr, index))?;

            info!(fhr = fhr, member = index + 1, path = %path.display(), "Wrote member state");
            written.push(path);
        }

        Ok(written)
    }
}
