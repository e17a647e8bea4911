//! Store configuration loaded from YAML.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),
}

/// Where the store lives and which schema gates ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// SQLite database file
    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Schema override; the bundled schema is used when unset
    #[serde(default)]
    pub schema: Option<PathBuf>,

    /// Default output directory for restores
    #[serde(default = "default_restore_dir")]
    pub restore_dir: PathBuf,
}

fn default_database() -> PathBuf {
    PathBuf::from("evaluations.db")
}

fn default_restore_dir() -> PathBuf {
    PathBuf::from("restored")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: default_database(),
            schema: None,
            restore_dir: default_restore_dir(),
        }
    }
}

impl Config {
    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        // An empty document deserializes as unit; treat it as all defaults.
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Parse configuration from a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }
}
