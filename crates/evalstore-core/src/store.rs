//! SQLite run store: validated ingestion and round-trip restoration.
//!
//! Each ingested file becomes one row in `runs` plus one row per record in
//! `evaluations`. The record itself is kept as an unparsed JSON blob, so a
//! restore writes back exactly what was validated.
//!
//! A connection is opened per operation and dropped before it returns.
//! Ingestion runs inside a single transaction; dropping it uncommitted on
//! any error path rolls everything back.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::filename::{FilenameError, RunSource, Strategy};
use crate::validation::{FileError, FileValidator};

/// Busy timeout for concurrent writers.
const BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

/// Student name stored for records without one.
pub const UNKNOWN_STUDENT: &str = "unknown";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS runs (
    run_id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_timestamp TEXT NOT NULL,
    source_file TEXT NOT NULL,
    strategy TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS evaluations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id INTEGER NOT NULL REFERENCES runs(run_id),
    student_name TEXT NOT NULL,
    strategy TEXT NOT NULL,
    raw_json TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_evaluations_run_student
    ON evaluations(run_id, student_name);
";

const RUN_SUMMARY_SQL: &str = "
SELECT r.run_id, r.run_timestamp, r.source_file, r.strategy,
       (SELECT COUNT(*) FROM evaluations e WHERE e.run_id = r.run_id)
FROM runs r";

/// Errors from store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Filename(#[from] FilenameError),

    #[error("Validation failed for {}:\n{report}", path.display())]
    ValidationFailed { path: PathBuf, report: String },

    #[error(transparent)]
    File(#[from] FileError),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stored record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid database value: {0}")]
    InvalidDbValue(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Outcome of a successful ingest.
#[derive(Debug, Clone, Serialize)]
pub struct IngestSummary {
    pub run_id: i64,
    pub source_file: String,
    pub strategy: Strategy,
    pub run_timestamp: String,

    /// Number of evaluation rows written
    pub records: usize,

    /// Warnings from validation; they never block ingestion
    pub warnings: Vec<String>,

    pub ingested_at: DateTime<Utc>,
}

/// A stored run with its evaluation count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub run_id: i64,
    pub run_timestamp: String,
    pub source_file: String,
    pub strategy: Strategy,
    pub evaluation_count: usize,
}

/// One stored evaluation row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredEvaluation {
    pub id: i64,
    pub run_id: i64,
    pub student_name: String,
    pub strategy: Strategy,
    pub record: Value,
}

/// Persistent store of runs and their evaluations.
///
/// Owned by the caller; holds the database location and the file validator
/// used to gate ingestion.
#[derive(Debug)]
pub struct RunStore {
    path: PathBuf,
    validator: FileValidator,
}

impl RunStore {
    /// Create a store handle for the database at `path`.
    ///
    /// Nothing is opened until an operation runs.
    pub fn new(path: impl Into<PathBuf>, validator: FileValidator) -> Self {
        Self {
            path: path.into(),
            validator,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn validator(&self) -> &FileValidator {
        &self.validator
    }

    fn connect(&self) -> Result<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", 1)?;
        Ok(conn)
    }

    /// Create both tables if absent. Safe to call repeatedly.
    pub fn initialize(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %self.path.display(), "Store initialized");
        Ok(())
    }

    /// Validate the file at `path` and persist it as a new run.
    ///
    /// The filename is checked before the file is read. An invalid file
    /// leaves the store untouched and returns the itemized report.
    pub fn ingest(&self, path: &Path) -> Result<IngestSummary> {
        let source = RunSource::from_path(path)?;

        let validated = self.validator.check(path)?;
        if !validated.report.is_valid() {
            tracing::warn!(
                file = %source.file_name,
                errors = validated.report.errors.len(),
                "Refusing to ingest invalid file"
            );
            return Err(StoreError::ValidationFailed {
                path: path.to_path_buf(),
                report: validated.report.itemized(),
            });
        }

        let mut conn = self.connect()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO runs (run_timestamp, source_file, strategy) VALUES (?1, ?2, ?3)",
            params![source.timestamp, source.file_name, source.strategy.as_str()],
        )?;
        let run_id = tx.last_insert_rowid();

        {
            let mut stmt = tx.prepare(
                "INSERT INTO evaluations (run_id, student_name, strategy, raw_json)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for record in &validated.records {
                let student = record
                    .get("student")
                    .and_then(Value::as_str)
                    .unwrap_or(UNKNOWN_STUDENT);
                let raw = serde_json::to_string(record)?;
                stmt.execute(params![run_id, student, source.strategy.as_str(), raw])?;
            }
        }

        tx.commit()?;

        tracing::info!(
            run_id,
            file = %source.file_name,
            strategy = %source.strategy,
            records = validated.records.len(),
            "Ingested run"
        );

        Ok(IngestSummary {
            run_id,
            source_file: source.file_name,
            strategy: source.strategy,
            run_timestamp: source.timestamp,
            records: validated.records.len(),
            warnings: validated.report.warnings,
            ingested_at: Utc::now(),
        })
    }

    /// All runs ordered by `(run_timestamp, strategy)`.
    pub fn list_runs(&self) -> Result<Vec<RunSummary>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY r.run_timestamp, r.strategy, r.run_id",
            RUN_SUMMARY_SQL
        ))?;
        let rows = stmt.query_map([], decode_run_row)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(run_summary(row?)?);
        }
        Ok(runs)
    }

    /// Look up a single run.
    pub fn run(&self, run_id: i64) -> Result<Option<RunSummary>> {
        let conn = self.connect()?;
        let row = conn
            .query_row(
                &format!("{} WHERE r.run_id = ?1", RUN_SUMMARY_SQL),
                params![run_id],
                decode_run_row,
            )
            .optional()?;
        row.map(run_summary).transpose()
    }

    /// Evaluations of one run, ordered by student name.
    pub fn evaluations(&self, run_id: i64) -> Result<Vec<StoredEvaluation>> {
        let conn = self.connect()?;
        load_evaluations(&conn, run_id)
    }

    /// Total number of evaluation rows.
    pub fn evaluation_count(&self) -> Result<usize> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM evaluations", [], |row| row.get(0))?;
        usize::try_from(count)
            .map_err(|_| StoreError::InvalidDbValue(format!("evaluation count {}", count)))
    }

    /// Write one JSON file per run into `output_dir`.
    ///
    /// Files are named after the run's original source file and hold the
    /// stored records ordered by student name, pretty-printed with two-space
    /// indentation. Returns the number of files written.
    ///
    /// `revalidate` is accepted for callers that want records re-checked on
    /// the way out; it currently passes records through unchanged.
    pub fn restore(&self, output_dir: &Path, revalidate: bool) -> Result<usize> {
        fs::create_dir_all(output_dir)?;

        let runs = self.list_runs()?;
        let conn = self.connect()?;

        let mut written = 0;
        for run in &runs {
            let records: Vec<Value> = load_evaluations(&conn, run.run_id)?
                .into_iter()
                .map(|e| e.record)
                .collect();

            if revalidate {
                tracing::debug!(run_id = run.run_id, "Revalidation requested; passing records through");
            }

            let target = output_dir.join(&run.source_file);
            let body = serde_json::to_string_pretty(&records)?;
            fs::write(&target, body)?;
            written += 1;

            tracing::debug!(
                run_id = run.run_id,
                file = %target.display(),
                records = records.len(),
                "Restored run"
            );
        }

        tracing::info!(files = written, dir = %output_dir.display(), "Restore complete");
        Ok(written)
    }
}

type RunRow = (i64, String, String, String, i64);

fn decode_run_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn run_summary((run_id, run_timestamp, source_file, strategy, count): RunRow) -> Result<RunSummary> {
    Ok(RunSummary {
        run_id,
        run_timestamp,
        source_file,
        strategy: decode_strategy(&strategy)?,
        evaluation_count: usize::try_from(count)
            .map_err(|_| StoreError::InvalidDbValue(format!("evaluation count {}", count)))?,
    })
}

fn load_evaluations(conn: &Connection, run_id: i64) -> Result<Vec<StoredEvaluation>> {
    let mut stmt = conn.prepare(
        "SELECT id, run_id, student_name, strategy, raw_json
         FROM evaluations
         WHERE run_id = ?1
         ORDER BY student_name, id",
    )?;
    let rows = stmt.query_map(params![run_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
        ))
    })?;

    let mut evaluations = Vec::new();
    for row in rows {
        let (id, run_id, student_name, strategy, raw) = row?;
        evaluations.push(StoredEvaluation {
            id,
            run_id,
            student_name,
            strategy: decode_strategy(&strategy)?,
            record: serde_json::from_str(&raw)?,
        });
    }
    Ok(evaluations)
}

fn decode_strategy(raw: &str) -> Result<Strategy> {
    raw.parse::<Strategy>()
        .map_err(|s| StoreError::InvalidDbValue(format!("unknown strategy '{}'", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaLoader;
    use crate::validation::RecordValidator;
    use serde_json::json;

    fn store(dir: &Path) -> RunStore {
        let records = RecordValidator::from_loader(&SchemaLoader::new(), None).unwrap();
        let store = RunStore::new(dir.join("evals.db"), FileValidator::new(records));
        store.initialize().unwrap();
        store
    }

    fn record(student: &str, a: f64, b: f64) -> Value {
        json!({
            "student": student,
            "metrics": {
                "gpt5_nano": {"pct": a},
                "gpt_oss_120b": {"pct": b},
                "avg_pct": (a + b) / 2.0,
                "diff_pct": (a - b).abs()
            }
        })
    }

    fn write_records(dir: &Path, name: &str, records: &[Value]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, serde_json::to_string(records).unwrap()).unwrap();
        path
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.initialize().unwrap();
        store.initialize().unwrap();
        assert!(store.list_runs().unwrap().is_empty());
    }

    #[test]
    fn test_initialize_keeps_existing_data() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = write_records(dir.path(), "results_direct_1.json", &[record("Alice", 80.0, 90.0)]);
        store.ingest(&path).unwrap();

        store.initialize().unwrap();
        assert_eq!(store.list_runs().unwrap().len(), 1);
        assert_eq!(store.evaluation_count().unwrap(), 1);
    }

    #[test]
    fn test_ingest_creates_run_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = write_records(
            dir.path(),
            "results_reverse_2025-01-01.json",
            &[record("Bob", 60.0, 70.0), record("Alice", 80.0, 90.0)],
        );

        let summary = store.ingest(&path).unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.strategy, Strategy::Reverse);
        assert_eq!(summary.run_timestamp, "2025-01-01");

        let evaluations = store.evaluations(summary.run_id).unwrap();
        let names: Vec<_> = evaluations.iter().map(|e| e.student_name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert!(evaluations.iter().all(|e| e.strategy == Strategy::Reverse));
    }

    #[test]
    fn test_invalid_record_inserts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let mut records: Vec<Value> = (0..10)
            .map(|i| record(&format!("student{:02}", i), 50.0 + i as f64, 60.0))
            .collect();
        records[4]["metrics"]["avg_pct"] = json!(1.0);
        let path = write_records(dir.path(), "results_eme_2025.json", &records);

        let err = store.ingest(&path).unwrap_err();
        match err {
            StoreError::ValidationFailed { report, .. } => {
                assert!(report.contains("Record 5 (student04)"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(store.list_runs().unwrap().is_empty());
        assert_eq!(store.evaluation_count().unwrap(), 0);
    }

    #[test]
    fn test_bad_strategy_rejected_before_reading() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        // The file does not exist: a filename failure must come first.
        let err = store
            .ingest(&dir.path().join("results_weird_2025.json"))
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Filename(FilenameError::InvalidStrategy { .. })
        ));
    }

    #[test]
    fn test_bad_filename_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = write_records(dir.path(), "grades.json", &[]);

        let err = store.ingest(&path).unwrap_err();
        assert!(matches!(
            err,
            StoreError::Filename(FilenameError::InvalidFilename(_))
        ));
    }

    #[test]
    fn test_empty_file_creates_empty_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = write_records(dir.path(), "results_direct_empty.json", &[]);

        let summary = store.ingest(&path).unwrap();
        assert_eq!(summary.records, 0);

        let runs = store.list_runs().unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].evaluation_count, 0);
    }

    #[test]
    fn test_missing_student_stored_as_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let records = RecordValidator::without_schema();
        let store = RunStore::new(dir.path().join("evals.db"), FileValidator::new(records));
        store.initialize().unwrap();

        let path = write_records(
            dir.path(),
            "results_direct_x.json",
            &[json!({"metrics": {"avg_pct": null}})],
        );
        let summary = store.ingest(&path).unwrap();
        assert!(summary.warnings.iter().any(|w| w.contains("Missing 'student'")));

        let evaluations = store.evaluations(summary.run_id).unwrap();
        assert_eq!(evaluations[0].student_name, UNKNOWN_STUDENT);
        assert!(evaluations[0].record.get("student").is_none());
    }

    #[test]
    fn test_restore_orders_by_student_and_keeps_filename() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let path = write_records(
            dir.path(),
            "results_direct_20250102.json",
            &[record("Zoe", 70.0, 72.0), record("Adam", 88.0, 84.0)],
        );
        store.ingest(&path).unwrap();

        let out = dir.path().join("restored");
        assert_eq!(store.restore(&out, false).unwrap(), 1);

        let restored = fs::read_to_string(out.join("results_direct_20250102.json")).unwrap();
        let expected = serde_json::to_string_pretty(&vec![
            record("Adam", 88.0, 84.0),
            record("Zoe", 70.0, 72.0),
        ])
        .unwrap();
        assert_eq!(restored, expected);
        assert!(restored.starts_with("[\n  {\n    \"student\": \"Adam\""));
    }

    #[test]
    fn test_insert_failure_rolls_back_whole_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let conn = Connection::open(store.path()).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_b BEFORE INSERT ON evaluations
             WHEN NEW.student_name = 'B'
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();
        drop(conn);

        let path = write_records(
            dir.path(),
            "results_direct_trigger.json",
            &[record("A", 50.0, 60.0), record("B", 70.0, 80.0), record("C", 90.0, 90.0)],
        );
        let err = store.ingest(&path).unwrap_err();
        assert!(matches!(err, StoreError::Sqlite(_)), "unexpected error: {err}");
        assert!(err.to_string().contains("boom"));

        assert!(store.list_runs().unwrap().is_empty());
        assert_eq!(store.evaluation_count().unwrap(), 0);
    }

    #[test]
    fn test_run_lookup_by_id() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let first = write_records(dir.path(), "results_direct_a.json", &[record("Ann", 80.0, 80.0)]);
        let second = write_records(dir.path(), "results_eme_b.json", &[]);
        store.ingest(&first).unwrap();
        let summary = store.ingest(&second).unwrap();

        let run = store.run(summary.run_id).unwrap().unwrap();
        assert_eq!(run.source_file, "results_eme_b.json");
        assert_eq!(run.strategy, Strategy::Eme);
        assert_eq!(run.evaluation_count, 0);

        assert!(store.run(summary.run_id + 100).unwrap().is_none());
    }

    #[test]
    fn test_restore_empty_store_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let out = dir.path().join("nested").join("out");

        assert_eq!(store.restore(&out, true).unwrap(), 0);
        assert!(out.is_dir());
    }

    #[test]
    fn test_list_runs_orders_by_timestamp_then_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        for name in [
            "results_reverse_2025b.json",
            "results_eme_2025a.json",
            "results_direct_2025b.json",
        ] {
            let path = write_records(dir.path(), name, &[]);
            store.ingest(&path).unwrap();
        }

        let files: Vec<_> = store
            .list_runs()
            .unwrap()
            .into_iter()
            .map(|r| r.source_file)
            .collect();
        assert_eq!(
            files,
            vec![
                "results_eme_2025a.json",
                "results_direct_2025b.json",
                "results_reverse_2025b.json",
            ]
        );
    }
}
