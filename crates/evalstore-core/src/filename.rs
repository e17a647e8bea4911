//! Source filename contract: `results_{strategy}_{timestamp}.json`.
//!
//! The timestamp is kept verbatim so a restored file carries the exact
//! name it was ingested under.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

lazy_static! {
    /// `results_<strategy>_<timestamp>.json`; the timestamp may contain underscores.
    static ref SOURCE_FILENAME: Regex = Regex::new(
        r"^results_(?P<strategy>[A-Za-z0-9]+)_(?P<timestamp>.+)\.json$"
    ).unwrap();
}

/// Errors from filename parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilenameError {
    #[error("Invalid filename '{0}': expected results_{{strategy}}_{{timestamp}}.json")]
    InvalidFilename(String),

    #[error("Invalid strategy '{strategy}' in '{filename}': expected one of direct, reverse, eme")]
    InvalidStrategy { strategy: String, filename: String },
}

/// Grading approach used to produce a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Direct,
    Reverse,
    Eme,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [Strategy::Direct, Strategy::Reverse, Strategy::Eme];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::Direct => "direct",
            Strategy::Reverse => "reverse",
            Strategy::Eme => "eme",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Strategy::ALL
            .into_iter()
            .find(|strategy| strategy.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

/// Provenance parsed from a source filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSource {
    /// File name without directories
    pub file_name: String,

    pub strategy: Strategy,

    /// Opaque timestamp, preserved verbatim
    pub timestamp: String,
}

impl RunSource {
    /// Parse the final component of `path`.
    pub fn from_path(path: &Path) -> Result<Self, FilenameError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FilenameError::InvalidFilename(path.display().to_string()))?;
        Self::parse(file_name)
    }

    /// Parse a bare file name.
    pub fn parse(file_name: &str) -> Result<Self, FilenameError> {
        let caps = SOURCE_FILENAME
            .captures(file_name)
            .ok_or_else(|| FilenameError::InvalidFilename(file_name.to_string()))?;

        let strategy = caps["strategy"].parse::<Strategy>().map_err(|strategy| {
            FilenameError::InvalidStrategy {
                strategy,
                filename: file_name.to_string(),
            }
        })?;

        Ok(Self {
            file_name: file_name.to_string(),
            strategy,
            timestamp: caps["timestamp"].to_string(),
        })
    }
}
