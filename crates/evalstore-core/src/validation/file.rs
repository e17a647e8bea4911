//! File-level validation: a JSON array of evaluation records.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::record::{student_name, RecordValidator};

/// Failures that prevent a file from being validated at all.
#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found: {}", path.display())]
    NotFound { path: PathBuf },

    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {}: {source}", path.display())]
    MalformedJson {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Verdict for a whole file.
#[derive(Debug, Clone, Serialize)]
pub struct FileReport {
    /// Number of elements in the top-level array
    pub record_count: usize,

    /// Every error, prefixed with its 1-based record index
    pub errors: Vec<String>,

    /// Every warning, prefixed the same way
    pub warnings: Vec<String>,

    /// When validation ran
    pub validated_at: DateTime<Utc>,
}

impl FileReport {
    fn new() -> Self {
        Self {
            record_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            validated_at: Utc::now(),
        }
    }

    /// True iff the file is an array and no record produced errors.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// One-line outcome.
    pub fn summary(&self) -> String {
        if !self.is_valid() {
            return format!("Validation failed with {}", count(self.errors.len(), "error"));
        }
        match self.warnings.len() {
            0 => "Validation passed".to_string(),
            n => format!("Validation passed with {}", count(n, "warning")),
        }
    }

    /// Multi-line report listing every error and warning.
    pub fn itemized(&self) -> String {
        let mut out = self.summary();
        if !self.errors.is_empty() {
            out.push_str("\nErrors:");
            for e in &self.errors {
                out.push_str("\n  - ");
                out.push_str(e);
            }
        }
        if !self.warnings.is_empty() {
            out.push_str("\nWarnings:");
            for w in &self.warnings {
                out.push_str("\n  - ");
                out.push_str(w);
            }
        }
        out
    }
}

impl fmt::Display for FileReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

impl From<&FileReport> for bool {
    fn from(report: &FileReport) -> bool {
        report.is_valid()
    }
}

/// A validated file together with the records that were checked.
#[derive(Debug, Clone)]
pub struct ValidatedFile {
    pub report: FileReport,
    pub records: Vec<Value>,
}

/// Runs the record validator over every element of a file.
#[derive(Debug)]
pub struct FileValidator {
    records: RecordValidator,
}

impl FileValidator {
    pub fn new(records: RecordValidator) -> Self {
        Self { records }
    }

    pub fn record_validator(&self) -> &RecordValidator {
        &self.records
    }

    /// Validate the file at `path`.
    pub fn validate(&self, path: &Path) -> Result<FileReport, FileError> {
        self.check(path).map(|validated| validated.report)
    }

    /// Validate the file at `path` and keep the parsed records.
    ///
    /// A missing file or unparsable JSON is an `Err`. A top-level value that
    /// is not an array is an invalid report with no records.
    pub fn check(&self, path: &Path) -> Result<ValidatedFile, FileError> {
        let document = read_json(path)?;
        let mut report = FileReport::new();

        let records = match document {
            Value::Array(records) => records,
            other => {
                report.errors.push(format!(
                    "Top-level JSON value must be an array, found {}",
                    kind(&other)
                ));
                tracing::warn!(path = %path.display(), "File is not a JSON array");
                return Ok(ValidatedFile {
                    report,
                    records: Vec::new(),
                });
            }
        };

        report.record_count = records.len();
        for (idx, record) in records.iter().enumerate() {
            let n = idx + 1;
            if !record.is_object() {
                report.errors.push(format!("Record {} is not an object", n));
                continue;
            }

            let prefix = match student_name(record) {
                Some(student) => format!("Record {} ({})", n, student),
                None => format!("Record {}", n),
            };
            let result = self.records.validate(record);
            report
                .errors
                .extend(result.errors.into_iter().map(|e| format!("{}: {}", prefix, e)));
            report
                .warnings
                .extend(result.warnings.into_iter().map(|w| format!("{}: {}", prefix, w)));
        }

        tracing::debug!(
            path = %path.display(),
            records = report.record_count,
            errors = report.errors.len(),
            warnings = report.warnings.len(),
            "Validated file"
        );

        Ok(ValidatedFile { report, records })
    }
}

fn read_json(path: &Path) -> Result<Value, FileError> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FileError::NotFound {
                path: path.to_path_buf(),
            });
        }
        Err(source) => {
            return Err(FileError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    serde_json::from_str(&contents).map_err(|source| FileError::MalformedJson {
        path: path.to_path_buf(),
        source,
    })
}

fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("1 {}", noun)
    } else {
        format!("{} {}s", n, noun)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
