//! Ensemble perturbation manager.
//!
//! Reads an ensemble of NetCDF files or a single perturbation file to gather
//! ensemble perturbations, then writes the perturbations and/or a full-state
//! file per ensemble member built on a base state.

mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use config::{load_run_file, RunFile};
use netcdf_dataset::silence_hdf5_errors;
use perturbation::{expand_forecast_hours, HourOutcome, Pipeline};

#[derive(Parser, Debug)]
#[command(name = "perturber")]
#[command(about = "Ensemble perturbation manager")]
struct Args {
    /// Base state on which to add perturbations. Template fields: fhr
    #[arg(short = 'b', long, env = "PERTURBER_BASE_STATE")]
    base_state: Option<String>,

    /// Output member filename; the full ensemble is written when present.
    /// Template fields: fhr, mem
    #[arg(short = 'e', long, env = "PERTURBER_MEMBER_TEMPLATE")]
    member_template: Option<String>,

    /// Forecast hours: one value, [start, stop, [increment]], or more than
    /// three values processed as given
    #[arg(short = 'f', long = "fcst-hour", num_args = 1.., value_delimiter = ',', env = "PERTURBER_FCST_HOURS")]
    fcst_hours: Vec<u32>,

    /// Ensemble member files as a glob pattern. Template fields: fhr
    #[arg(short = 'i', long = "input", env = "PERTURBER_INPUT")]
    input: Option<String>,

    /// Output directory. Template fields: mem
    #[arg(short = 'o', long = "output-dir", env = "PERTURBER_OUTPUT_DIR")]
    output_dir: Option<String>,

    /// Perturbation file: input when no -i is given, output with
    /// --write-perturbations. Template fields: fhr
    #[arg(short = 'p', long = "perturbation-file", env = "PERTURBER_PERTURBATION_FILE")]
    perturbation_file: Option<String>,

    /// Type of variables to process
    #[arg(short = 'v', long = "vars", value_parser = ["atmo", "bndy", "sfc"], env = "PERTURBER_VARS")]
    vars: Option<String>,

    /// Write the perturbation file given by -p
    #[arg(long, alias = "write_perturbations", env = "PERTURBER_WRITE_PERTURBATIONS")]
    write_perturbations: bool,

    /// YAML run file; command-line values take precedence
    #[arg(short = 'c', long, env = "PERTURBER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info", env = "PERTURBER_LOG_LEVEL")]
    log_level: String,

    /// Log format
    #[arg(long, default_value = "json", value_parser = ["json", "pretty"], env = "PERTURBER_LOG_FORMAT")]
    log_format: String,
}

impl Args {
    /// Settings given on the command line.
    fn overrides(&self) -> RunFile {
        RunFile {
            group: self.vars.clone(),
            forecast_hours: (!self.fcst_hours.is_empty()).then(|| self.fcst_hours.clone()),
            ensemble_pattern: self.input.clone(),
            perturbation_file: self.perturbation_file.clone(),
            write_perturbations: self.write_perturbations.then_some(true),
            base_state: self.base_state.clone(),
            member_template: self.member_template.clone(),
            output_dir: self.output_dir.clone(),
            writer: None,
        }
    }
}

fn init_tracing(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true);

    if log_format == "pretty" {
        tracing::subscriber::set_global_default(builder.pretty().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_tracing(&args.log_level, &args.log_format)?;
    silence_hdf5_errors();

    info!("Starting ensemble perturbation manager");

    let file = match &args.config {
        Some(path) => {
            info!(path = %path.display(), "Loading run file");
            load_run_file(path)?
        }
        None => RunFile::default(),
    };
    let settings = file.merge(args.overrides());

    let hours = expand_forecast_hours(&settings.forecast_hour_args())?;
    let config = settings.into_pipeline_config()?;

    info!(
        group = %config.group,
        hours = ?hours,
        input = ?config.ensemble_pattern,
        perturbation_file = ?config.perturbation_file,
        write_perturbations = config.write_perturbations,
        output_dir = %config.output_dir,
        "Loaded configuration"
    );

    let pipeline = Pipeline::new(config)?;
    let summary = pipeline.run(&hours)?;

    for outcome in &summary.hours {
        match outcome {
            HourOutcome::Processed(report) => info!(
                fhr = report.fhr,
                source = ?report.source,
                members = report.members,
                member_files = report.member_files.len(),
                perturbations_saved = report.saved_perturbations.is_some(),
                elapsed_secs = report.elapsed.as_secs_f64(),
                "Forecast hour processed"
            ),
            HourOutcome::Skipped { fhr, reason } => {
                warn!(fhr = fhr, reason = %reason, "Forecast hour skipped")
            }
        }
    }

    info!(
        processed = summary.processed().count(),
        skipped = summary.skipped_hours().len(),
        member_files = summary.member_files_written(),
        perturbation_files = summary.perturbation_files_written(),
        "Done"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_options_match_driver_flags() {
        let args = Args::try_parse_from([
            "perturber",
            "-v", "atmo",
            "-o", "/out/mem{mem:03}",
            "-i", "/ens/f{fhr:03}/mem*.nc",
            "-f", "0", "12", "3",
            "--write-perturbations",
            "-p", "/pert/f{fhr:03}.nc",
        ])
        .unwrap();

        let overrides = args.overrides();
        assert_eq!(overrides.group.as_deref(), Some("atmo"));
        assert_eq!(overrides.forecast_hours, Some(vec![0, 12, 3]));
        assert_eq!(overrides.write_perturbations, Some(true));
        assert!(overrides.base_state.is_none());
    }

    #[test]
    fn test_unknown_group_rejected_by_parser() {
        assert!(Args::try_parse_from(["perturber", "-v", "foo", "-o", "/out"]).is_err());
    }

    #[test]
    fn test_unset_flag_does_not_override_file() {
        let args = Args::try_parse_from(["perturber"]).unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides, RunFile::default());
    }
}
