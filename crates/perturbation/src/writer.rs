//! Output writer for reconstituted member states.
//!
//! Variables are written in the type they were read with unless a float
//! precision is forced, so base-state fields outside the perturbed group
//! come out exactly as they went in.

use std::path::Path;

use netcdf_dataset::{write_dataset, Dataset, Encoding, Precision};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PerturbationError, Result};

/// Encoding settings for member output files.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WriterConfig {
    /// Deflate level (0-9). 0 stores data uncompressed.
    pub compression_level: u8,

    /// Enable byte shuffle filter ahead of deflate.
    pub shuffle: bool,

    /// Storage type of data variables. `source` keeps each variable's own
    /// type; `f32` and `f64` convert every data variable.
    pub precision: Precision,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            compression_level: 4,
            shuffle: true,
            precision: Precision::Source,
        }
    }
}

impl WriterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("PERT_COMPRESSION_LEVEL") {
            if let Ok(level) = val.parse() {
                config.compression_level = level;
            }
        }

        if let Ok(val) = std::env::var("PERT_SHUFFLE") {
            config.shuffle = val.to_lowercase() == "true" || val == "1";
        }

        if let Ok(val) = std::env::var("PERT_OUTPUT_PRECISION") {
            match Precision::parse(&val) {
                Some(precision) => config.precision = precision,
                None => warn!(value = %val, "Ignoring unknown PERT_OUTPUT_PRECISION"),
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.compression_level > 9 {
            return Err(PerturbationError::InvalidConfig(
                "compression_level must be 0-9".to_string(),
            ));
        }
        Ok(())
    }

    /// NetCDF encoding for these settings.
    pub fn encoding(&self) -> Encoding {
        Encoding {
            precision: self.precision,
            deflate_level: (self.compression_level > 0).then_some(i32::from(self.compression_level)),
            shuffle: self.shuffle,
        }
    }
}

/// Writes one member state per call.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    encoding: Encoding,
}

impl OutputWriter {
    pub fn new(config: &WriterConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            encoding: config.encoding(),
        })
    }

    /// Write `state` to `path`, creating parent directories and replacing
    /// any existing file.
    pub fn write(&self, state: &Dataset, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PerturbationError::io(parent, e))?;
        }

        write_dataset(state, path, &self.encoding)
            .map_err(|e| PerturbationError::dataset(path.display(), e))?;

        debug!(
            path = %path.display(),
            precision = self.encoding.precision.as_str(),
            deflate = ?self.encoding.deflate_level,
            "Wrote member state"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = WriterConfig::default();
        assert!(config.validate().is_ok());
        let encoding = config.encoding();
        assert_eq!(encoding.deflate_level, Some(4));
        assert!(encoding.shuffle);
        assert_eq!(encoding.precision, Precision::Source);
    }

    #[test]
    fn test_level_zero_disables_deflate() {
        let config = WriterConfig {
            compression_level: 0,
            ..Default::default()
        };
        assert_eq!(config.encoding().deflate_level, None);
    }

    #[test]
    fn test_invalid_level() {
        let config = WriterConfig {
            compression_level: 12,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(OutputWriter::new(&config).is_err());
    }

    #[test]
    fn test_from_env() {
        std::env::set_var("PERT_COMPRESSION_LEVEL", "7");
        std::env::set_var("PERT_SHUFFLE", "false");
        std::env::set_var("PERT_OUTPUT_PRECISION", "f64");

        let config = WriterConfig::from_env();
        assert_eq!(config.compression_level, 7);
        assert!(!config.shuffle);
        assert_eq!(config.precision, Precision::Double);

        std::env::remove_var("PERT_COMPRESSION_LEVEL");
        std::env::remove_var("PERT_SHUFFLE");
        std::env::remove_var("PERT_OUTPUT_PRECISION");
    }
}
