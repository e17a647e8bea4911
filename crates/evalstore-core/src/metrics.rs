//! Derived percentage rules.
//!
//! `metrics.avg_pct` and `metrics.diff_pct` are computed from the two model
//! percentages. These checks are pure functions of already-parsed values so
//! they can be exercised without a record or a schema.

use serde_json::Value;
use std::fmt;

/// Metric key for the first grading model.
pub const PRIMARY_MODEL: &str = "gpt5_nano";

/// Metric key for the second grading model.
pub const SECONDARY_MODEL: &str = "gpt_oss_120b";

/// Both grading models, in report order.
pub const MODELS: [&str; 2] = [PRIMARY_MODEL, SECONDARY_MODEL];

/// Maximum allowed distance between a stored and an expected derived value.
pub const TOLERANCE: f64 = 0.1;

/// A derived metric field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedField {
    AvgPct,
    DiffPct,
}

impl DerivedField {
    /// Key of this field inside `metrics`.
    pub fn key(self) -> &'static str {
        match self {
            DerivedField::AvgPct => "avg_pct",
            DerivedField::DiffPct => "diff_pct",
        }
    }

    fn describe(self) -> &'static str {
        match self {
            DerivedField::AvgPct => "average",
            DerivedField::DiffPct => "absolute difference",
        }
    }
}

impl fmt::Display for DerivedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A model percentage after coercion.
#[derive(Debug, Clone, PartialEq)]
pub enum Percentage {
    /// The model produced a score.
    Score(f64),
    /// The model produced nothing (`null` or absent).
    Missing,
    /// Present but not numeric; carries the offending value.
    NotNumeric(Value),
}

impl Percentage {
    /// Coerce a raw `pct` value.
    ///
    /// Numbers and numeric strings coerce. `null` and absence are a valid
    /// "no score" state. Everything else is not numeric.
    pub fn coerce(raw: Option<&Value>) -> Self {
        match raw {
            None | Some(Value::Null) => Percentage::Missing,
            Some(Value::Number(n)) => match n.as_f64() {
                Some(v) if v.is_finite() => Percentage::Score(v),
                _ => Percentage::NotNumeric(Value::Number(n.clone())),
            },
            Some(Value::String(s)) => match s.trim().parse::<f64>() {
                Ok(v) if v.is_finite() => Percentage::Score(v),
                _ => Percentage::NotNumeric(Value::String(s.clone())),
            },
            Some(other) => Percentage::NotNumeric(other.clone()),
        }
    }
}

/// Values the derived fields must hold for a pair of model percentages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedDerived {
    pub avg_pct: f64,
    pub diff_pct: f64,
}

impl ExpectedDerived {
    /// Returns `None` when either model produced nothing.
    pub fn from_scores(a: Option<f64>, b: Option<f64>) -> Option<Self> {
        let (a, b) = (a?, b?);
        Some(Self {
            avg_pct: (a + b) / 2.0,
            diff_pct: (a - b).abs(),
        })
    }

    pub fn get(&self, field: DerivedField) -> f64 {
        match field {
            DerivedField::AvgPct => self.avg_pct,
            DerivedField::DiffPct => self.diff_pct,
        }
    }
}

/// Outcome of comparing one stored derived value against its expectation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DerivedOutcome {
    Consistent,
    Inconsistent {
        field: DerivedField,
        stored: f64,
        expected: f64,
    },
}

impl DerivedOutcome {
    pub fn is_consistent(&self) -> bool {
        matches!(self, DerivedOutcome::Consistent)
    }
}

impl fmt::Display for DerivedOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DerivedOutcome::Consistent => f.write_str("consistent"),
            DerivedOutcome::Inconsistent {
                field,
                stored,
                expected,
            } => write!(
                f,
                "metrics.{} is {:.2} but expected {:.2} ({} of {}.pct and {}.pct)",
                field,
                stored,
                expected,
                field.describe(),
                PRIMARY_MODEL,
                SECONDARY_MODEL
            ),
        }
    }
}

/// Compare a stored derived value against the expected one within [`TOLERANCE`].
pub fn check_derived(field: DerivedField, stored: f64, expected: &ExpectedDerived) -> DerivedOutcome {
    let expected = expected.get(field);
    if (stored - expected).abs() > TOLERANCE {
        DerivedOutcome::Inconsistent {
            field,
            stored,
            expected,
        }
    } else {
        DerivedOutcome::Consistent
    }
}
