//! Record and file validation.
//!
//! Business-rule violations are never returned as `Err`: they are collected
//! into [`RecordReport`] and [`FileReport`]. Only failures to obtain the
//! inputs (missing file, unparsable JSON, missing schema) are errors.

mod file;
mod record;

pub use file::{FileError, FileReport, FileValidator, ValidatedFile};
pub use record::{student_name, RecordReport, RecordValidator, SchemaCheck, SCHEMA_SKIPPED_WARNING};

use std::path::Path;
use thiserror::Error;

use crate::schema::{SchemaError, SchemaLoader};

/// Errors from [`validate_file`].
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    File(#[from] FileError),
}

/// Validate a file against the schema at `schema_path` (or the bundled default).
///
/// Convenience wrapper that loads the schema on every call; long-lived
/// callers should build a [`FileValidator`] once.
pub fn validate_file(path: &Path, schema_path: Option<&Path>) -> Result<FileReport, ValidationError> {
    let records = RecordValidator::from_loader(&SchemaLoader::new(), schema_path)?;
    Ok(FileValidator::new(records).validate(path)?)
}
