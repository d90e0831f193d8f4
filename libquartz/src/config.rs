use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::{DEFAULT_BLOCK_SIZE, DEFAULT_SAMPLE_RATE};
use super::error::ConfigError;

/// Output file formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Single `adc` dataset with attributes; needs the `hdf5` feature
    Hdf5,
    /// Row-major little-endian f32 plus a YAML sidecar
    Flat,
}

/// Structure representing a conversion job. Contains pathing and acquisition information
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvertConfig {
    /// Capture files, in acquisition order
    pub capture_paths: Vec<PathBuf>,
    pub output_path: PathBuf,
    pub output_format: OutputFormat,
    pub calibration_path: Option<PathBuf>,
    pub scale_path: Option<PathBuf>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    #[serde(default)]
    pub title: String,
}

fn default_sample_rate() -> f64 {
    DEFAULT_SAMPLE_RATE
}

fn default_block_size() -> usize {
    DEFAULT_BLOCK_SIZE
}

impl Default for ConvertConfig {
    /// Generate a new ConvertConfig object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            capture_paths: vec![PathBuf::from("None")],
            output_path: PathBuf::from("None"),
            output_format: OutputFormat::Flat,
            calibration_path: None,
            scale_path: None,
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            title: String::from(""),
        }
    }
}

impl ConvertConfig {
    /// Read the configuration in a YAML file
    /// Returns a ConvertConfig if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as YAML
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        std::fs::write(config_path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capture_paths.is_empty() {
            return Err(ConfigError::NoCaptureFiles);
        }
        if self.block_size == 0 {
            return Err(ConfigError::BadBlockSize(self.block_size));
        }
        Ok(())
    }

    pub fn has_calibration(&self) -> bool {
        self.calibration_path.is_some()
    }

    pub fn has_scale(&self) -> bool {
        self.scale_path.is_some()
    }
}
