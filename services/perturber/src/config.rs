//! Run configuration for the perturber.
//!
//! Settings come from an optional YAML run file and from the command line.
//! Both are read into a [`RunFile`]; command-line values override file
//! values field by field.
//!
//! Supports environment variable substitution in the run file using
//! `${VAR}` and `${VAR:-default}` syntax.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use perturbation::{PipelineConfig, VariableGroup, WriterConfig};
use serde::{Deserialize, Serialize};

/// Default forecast hour when none is given anywhere.
const DEFAULT_FORECAST_HOURS: [u32; 1] = [0];

/// Contents of a YAML run file.
///
/// ```yaml
/// group: atmo
/// forecast_hours: [0, 12, 3]
/// ensemble_pattern: /data/ens/f{fhr:03}/mem*/fv_core.res.nc
/// perturbation_file: /data/pert/atmo_f{fhr:03}.nc
/// write_perturbations: true
/// base_state: /data/control/f{fhr:03}/fv_core.res.nc
/// member_template: fv_core.res.f{fhr:03}.nc
/// output_dir: ${OUTPUT_ROOT:-/scratch}/mem{mem:03}
/// writer:
///   compression_level: 4
///   precision: source
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunFile {
    pub group: Option<String>,
    pub forecast_hours: Option<Vec<u32>>,
    pub ensemble_pattern: Option<String>,
    pub perturbation_file: Option<String>,
    pub write_perturbations: Option<bool>,
    pub base_state: Option<String>,
    pub member_template: Option<String>,
    pub output_dir: Option<String>,
    pub writer: Option<WriterConfig>,
}

impl RunFile {
    /// Overlay `overrides` on top of these settings.
    pub fn merge(self, overrides: RunFile) -> RunFile {
        RunFile {
            group: overrides.group.or(self.group),
            forecast_hours: overrides.forecast_hours.or(self.forecast_hours),
            ensemble_pattern: overrides.ensemble_pattern.or(self.ensemble_pattern),
            perturbation_file: overrides.perturbation_file.or(self.perturbation_file),
            write_perturbations: overrides.write_perturbations.or(self.write_perturbations),
            base_state: overrides.base_state.or(self.base_state),
            member_template: overrides.member_template.or(self.member_template),
            output_dir: overrides.output_dir.or(self.output_dir),
            writer: overrides.writer.or(self.writer),
        }
    }

    /// Forecast-hour arguments, before range expansion.
    pub fn forecast_hour_args(&self) -> Vec<u32> {
        match &self.forecast_hours {
            Some(hours) if !hours.is_empty() => hours.clone(),
            _ => DEFAULT_FORECAST_HOURS.to_vec(),
        }
    }

    /// Build the pipeline configuration.
    ///
    /// Writer settings come from the run file when present and from the
    /// `PERT_*` environment variables otherwise.
    pub fn into_pipeline_config(self) -> Result<PipelineConfig> {
        let group_name = self
            .group
            .context("No variable group given (use -v atmo|bndy|sfc or `group:` in the run file)")?;
        let group: VariableGroup = group_name.parse()?;
        let output_dir = self
            .output_dir
            .context("No output directory given (use -o or `output_dir:` in the run file)")?;

        let config = PipelineConfig {
            group,
            ensemble_pattern: self.ensemble_pattern,
            perturbation_file: self.perturbation_file,
            write_perturbations: self.write_perturbations.unwrap_or(false),
            base_state: self.base_state,
            member_template: self.member_template,
            output_dir,
            writer: self.writer.unwrap_or_else(WriterConfig::from_env),
        };
        config.writer.validate()?;
        Ok(config)
    }
}

/// Load and parse a run file with environment variable substitution.
pub fn load_run_file<P: AsRef<Path>>(path: P) -> Result<RunFile> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("Failed to read run file from {:?}", path.as_ref()))?;

    let expanded = expand_env_vars(&content)?;

    serde_yaml::from_str(&expanded)
        .with_context(|| format!("Failed to parse run file {:?}", path.as_ref()))
}

/// Expand `${VAR}` and `${VAR:-default}` references.
///
/// `{fhr}` and `{mem}` placeholders are not preceded by `$` and pass through.
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = String::new();
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'

            let mut var_expr = String::new();
            let mut brace_count = 1;

            while brace_count > 0 {
                match chars.next() {
                    Some('{') => {
                        brace_count += 1;
                        var_expr.push('{');
                    }
                    Some('}') => {
                        brace_count -= 1;
                        if brace_count > 0 {
                            var_expr.push('}');
                        }
                    }
                    Some(c) => var_expr.push(c),
                    None => anyhow::bail!("Unclosed variable substitution: ${{{}", var_expr),
                }
            }

            result.push_str(&resolve_var_expr(&var_expr)?);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

/// Resolve variable expression (supports VAR and VAR:-default syntax)
fn resolve_var_expr(expr: &str) -> Result<String> {
    if let Some((var_name, default)) = expr.split_once(":-") {
        match std::env::var(var_name.trim()) {
            Ok(val) if !val.is_empty() => Ok(val),
            _ => Ok(default.to_string()),
        }
    } else {
        std::env::var(expr.trim()).with_context(|| format!("Environment variable {} not set", expr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netcdf_dataset::Precision;

    #[test]
    fn test_expand_env_vars_simple() {
        std::env::set_var("PERTURBER_TEST_ROOT", "/scratch/run1");
        let result = expand_env_vars("output_dir: ${PERTURBER_TEST_ROOT}/mem{mem:03}").unwrap();
        assert_eq!(result, "output_dir: /scratch/run1/mem{mem:03}");
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        std::env::remove_var("PERTURBER_TEST_UNSET");
        let result = expand_env_vars("${PERTURBER_TEST_UNSET:-/tmp}/f{fhr}").unwrap();
        assert_eq!(result, "/tmp/f{fhr}");
    }

    #[test]
    fn test_expand_env_vars_missing_required() {
        std::env::remove_var("PERTURBER_TEST_REQUIRED");
        assert!(expand_env_vars("${PERTURBER_TEST_REQUIRED}").is_err());
        assert!(expand_env_vars("${UNCLOSED").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let file = RunFile {
            group: Some("atmo".to_string()),
            forecast_hours: Some(vec![0, 12, 3]),
            output_dir: Some("/file/out".to_string()),
            write_perturbations: Some(true),
            ..Default::default()
        };
        let cli = RunFile {
            group: Some("sfc".to_string()),
            output_dir: Some("/cli/out".to_string()),
            ..Default::default()
        };

        let merged = file.merge(cli);
        assert_eq!(merged.group.as_deref(), Some("sfc"));
        assert_eq!(merged.output_dir.as_deref(), Some("/cli/out"));
        assert_eq!(merged.forecast_hour_args(), vec![0, 12, 3]);
        assert_eq!(merged.write_perturbations, Some(true));
    }

    #[test]
    fn test_default_forecast_hour() {
        assert_eq!(RunFile::default().forecast_hour_args(), vec![0]);
    }

    #[test]
    fn test_into_pipeline_config() {
        let run = RunFile {
            group: Some("bndy".to_string()),
            output_dir: Some("/out".to_string()),
            writer: Some(WriterConfig {
                precision: Precision::Double,
                ..Default::default()
            }),
            ..Default::default()
        };
        let config = run.into_pipeline_config().unwrap();
        assert_eq!(config.group, VariableGroup::Bndy);
        assert!(!config.write_perturbations);
        assert_eq!(config.writer.precision, Precision::Double);
    }

    #[test]
    fn test_missing_required_settings() {
        let no_group = RunFile {
            output_dir: Some("/out".to_string()),
            ..Default::default()
        };
        assert!(no_group.into_pipeline_config().is_err());

        let bad_group = RunFile {
            group: Some("foo".to_string()),
            output_dir: Some("/out".to_string()),
            ..Default::default()
        };
        let err = bad_group.into_pipeline_config().unwrap_err();
        assert!(err.to_string().contains("foo"));

        let no_output = RunFile {
            group: Some("atmo".to_string()),
            ..Default::default()
        };
        assert!(no_output.into_pipeline_config().is_err());
    }

    #[test]
    fn test_load_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::env::set_var("PERTURBER_TEST_DATA", "/data");
        fs::write(
            &path,
            "group: sfc\n\
             forecast_hours: [0, 6]\n\
             ensemble_pattern: ${PERTURBER_TEST_DATA}/ens/f{fhr:03}/mem*.nc\n\
             output_dir: /out/mem{mem:03}\n\
             writer:\n  compression_level: 6\n",
        )
        .unwrap();

        let run = load_run_file(&path).unwrap();
        assert_eq!(
            run.ensemble_pattern.as_deref(),
            Some("/data/ens/f{fhr:03}/mem*.nc")
        );
        let writer = run.writer.clone().unwrap();
        assert_eq!(writer.compression_level, 6);
        assert!(writer.shuffle);

        fs::write(&path, "group: sfc\nbogus: 1\n").unwrap();
        assert!(load_run_file(&path).is_err());
    }
}
