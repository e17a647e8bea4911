//! # evalstore-core
//!
//! Validation and round-trip storage for automated grading results.
//!
//! Grading runs produce JSON arrays of evaluation records. This crate:
//! - checks every record against a JSON Schema plus derived-metric rules
//! - persists a fully valid file as one run, atomically
//! - writes every stored run back out under its original filename
//!
//! ## Key Guarantees
//!
//! 1. **All-or-nothing**: an invalid record means zero rows for that file
//! 2. **Verbatim payloads**: stored records are exactly what was validated
//! 3. **Reported, not thrown**: rule violations come back as data
//! 4. **Deterministic restore**: records are written ordered by student name
//!
//! ## Example
//!
//! ```rust,ignore
//! use evalstore_core::{open_store, Config, SchemaLoader};
//!
//! let loader = SchemaLoader::new();
//! let store = open_store(&Config::default(), &loader)?;
//! store.initialize()?;
//!
//! let summary = store.ingest(Path::new("results_direct_20250101.json"))?;
//! println!("run {} with {} records", summary.run_id, summary.records);
//!
//! let files = store.restore(Path::new("restored"), false)?;
//! ```

pub mod config;
pub mod filename;
pub mod metrics;
pub mod schema;
pub mod store;
pub mod validation;

// Re-export main types at crate root
pub use config::{Config, ConfigError};
pub use filename::{FilenameError, RunSource, Strategy};
pub use metrics::{DerivedField, DerivedOutcome, ExpectedDerived, Percentage, TOLERANCE};
pub use schema::{SchemaError, SchemaLoader, BUNDLED_SCHEMA};
pub use store::{IngestSummary, RunStore, RunSummary, StoreError, StoredEvaluation};
pub use validation::{
    validate_file, FileError, FileReport, FileValidator, RecordReport, RecordValidator,
    SchemaCheck, ValidationError,
};

/// Build a run store from configuration.
///
/// Loads the configured schema (or the bundled one) through `loader` and
/// gates ingestion on it. The store itself is not touched until an
/// operation runs.
pub fn open_store(config: &Config, loader: &SchemaLoader) -> Result<RunStore, SchemaError> {
    let records = RecordValidator::from_loader(loader, config.schema.as_deref())?;
    Ok(RunStore::new(&config.database, FileValidator::new(records)))
}
