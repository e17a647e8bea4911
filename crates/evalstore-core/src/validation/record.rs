//! Per-record validation: JSON Schema plus derived-metric business rules.

use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;

use crate::metrics::{
    check_derived, DerivedField, DerivedOutcome, ExpectedDerived, Percentage, MODELS,
};
use crate::schema::{SchemaError, SchemaLoader};

/// Warning attached to every record when structural validation is unavailable.
pub const SCHEMA_SKIPPED_WARNING: &str =
    "Schema validation skipped: JSON Schema support is not available in this build";

/// Errors and warnings for a single record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordReport {
    /// Must-fix problems; any entry makes the record invalid
    pub errors: Vec<String>,

    /// Advisory findings that never block persistence
    pub warnings: Vec<String>,
}

impl RecordReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// How structural validation is performed, chosen once at construction.
pub enum SchemaCheck {
    /// Records are checked against a compiled draft-07 schema.
    #[cfg(feature = "schema-validation")]
    Checked(Box<jsonschema::Validator>),

    /// No schema engine; each record gets [`SCHEMA_SKIPPED_WARNING`].
    Skipped,
}

impl fmt::Debug for SchemaCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(feature = "schema-validation")]
            SchemaCheck::Checked(_) => f.write_str("SchemaCheck::Checked"),
            SchemaCheck::Skipped => f.write_str("SchemaCheck::Skipped"),
        }
    }
}

impl SchemaCheck {
    /// Select the strategy for a loaded schema document.
    ///
    /// With the `schema-validation` feature the schema is compiled and a
    /// compile failure is a configuration error. Without it the strategy
    /// degrades to [`SchemaCheck::Skipped`].
    pub fn for_schema(schema: &Value) -> Result<Self, SchemaError> {
        compile(schema)
    }

    #[cfg_attr(not(feature = "schema-validation"), allow(unused_variables))]
    fn check(&self, record: &Value, report: &mut RecordReport) {
        match self {
            #[cfg(feature = "schema-validation")]
            SchemaCheck::Checked(validator) => {
                for e in validator.iter_errors(record) {
                    let path = dotted_path(&e.instance_path.to_string());
                    if path.is_empty() {
                        report.error(format!("Schema violation: {}", e));
                    } else {
                        report.error(format!("Schema violation at {}: {}", path, e));
                    }
                }
            }
            SchemaCheck::Skipped => report.warning(SCHEMA_SKIPPED_WARNING),
        }
    }
}

#[cfg(feature = "schema-validation")]
fn compile(schema: &Value) -> Result<SchemaCheck, SchemaError> {
    let validator = jsonschema::options()
        .with_draft(jsonschema::Draft::Draft7)
        .build(schema)
        .map_err(|e| SchemaError::Compile(e.to_string()))?;
    Ok(SchemaCheck::Checked(Box::new(validator)))
}

#[cfg(not(feature = "schema-validation"))]
fn compile(_schema: &Value) -> Result<SchemaCheck, SchemaError> {
    tracing::warn!("Built without schema-validation; records will not be schema-checked");
    Ok(SchemaCheck::Skipped)
}

/// Turn a JSON pointer (`/metrics/avg_pct`) into a dotted path (`metrics.avg_pct`).
fn dotted_path(pointer: &str) -> String {
    pointer
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.replace("~1", "/").replace("~0", "~"))
        .collect::<Vec<_>>()
        .join(".")
}

/// Validates individual evaluation records.
#[derive(Debug)]
pub struct RecordValidator {
    schema: SchemaCheck,
}

impl RecordValidator {
    /// Build a validator for a loaded schema document.
    pub fn new(schema: &Value) -> Result<Self, SchemaError> {
        Ok(Self {
            schema: SchemaCheck::for_schema(schema)?,
        })
    }

    /// Load the schema at `path` (or the bundled default) and build a validator.
    pub fn from_loader(loader: &SchemaLoader, path: Option<&Path>) -> Result<Self, SchemaError> {
        let schema = loader.load(path)?;
        Self::new(&schema)
    }

    /// A validator that applies business rules only.
    pub fn without_schema() -> Self {
        Self {
            schema: SchemaCheck::Skipped,
        }
    }

    pub fn schema_check(&self) -> &SchemaCheck {
        &self.schema
    }

    /// Validate one record.
    ///
    /// Never fails: every problem is returned in the report.
    pub fn validate(&self, record: &Value) -> RecordReport {
        let mut report = RecordReport::default();

        self.schema.check(record, &mut report);

        let Some(fields) = record.as_object() else {
            report.error("Record is not an object");
            return report;
        };

        check_student(fields, &mut report);
        check_metrics(fields, &mut report);

        report
    }
}

/// The record's student identifier, when it is a non-blank string.
pub fn student_name(record: &Value) -> Option<&str> {
    record
        .get("student")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

fn check_student(fields: &Map<String, Value>, report: &mut RecordReport) {
    match fields.get("student") {
        None => report.warning("Missing 'student' field"),
        Some(Value::String(s)) if s.trim().is_empty() => {
            report.warning("'student' field is blank")
        }
        Some(Value::String(_)) => {}
        Some(_) => report.warning("'student' field is not a string"),
    }
}

fn check_metrics(fields: &Map<String, Value>, report: &mut RecordReport) {
    let metrics = match fields.get("metrics") {
        Some(Value::Object(m)) => m,
        Some(_) => {
            report.error("'metrics' must be an object");
            return;
        }
        None => {
            report.error("Missing 'metrics' object");
            return;
        }
    };

    let expected = match model_scores(metrics, report) {
        ModelScores::NotNumeric => return,
        ModelScores::Available(expected) => expected,
        ModelScores::Unavailable => None,
    };

    for field in [DerivedField::AvgPct, DerivedField::DiffPct] {
        match Percentage::coerce(metrics.get(field.key())) {
            Percentage::Missing => {}
            Percentage::NotNumeric(value) => {
                report.error(format!("metrics.{} must be numeric, got {}", field, value));
            }
            Percentage::Score(stored) => {
                let Some(expected) = expected.as_ref() else {
                    continue;
                };
                if let outcome @ DerivedOutcome::Inconsistent { .. } =
                    check_derived(field, stored, expected)
                {
                    report.error(outcome.to_string());
                }
            }
        }
    }
}

enum ModelScores {
    /// Both model objects present with numeric-or-null percentages.
    Available(Option<ExpectedDerived>),
    /// At least one model object is absent or not an object.
    Unavailable,
    /// A percentage was present but not numeric; errors already recorded.
    NotNumeric,
}

fn model_scores(metrics: &Map<String, Value>, report: &mut RecordReport) -> ModelScores {
    let (Some(Value::Object(first)), Some(Value::Object(second))) =
        (metrics.get(MODELS[0]), metrics.get(MODELS[1]))
    else {
        return ModelScores::Unavailable;
    };

    let mut scores = [None, None];
    let mut numeric = true;
    for (i, (model, fields)) in MODELS.iter().zip([first, second]).enumerate() {
        match Percentage::coerce(fields.get("pct")) {
            Percentage::Score(v) => scores[i] = Some(v),
            Percentage::Missing => {}
            Percentage::NotNumeric(value) => {
                report.error(format!("metrics.{}.pct must be numeric, got {}", model, value));
                numeric = false;
            }
        }
    }

    if !numeric {
        return ModelScores::NotNumeric;
    }
    ModelScores::Available(ExpectedDerived::from_scores(scores[0], scores[1]))
}
