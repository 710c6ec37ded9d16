//! Validators run before any model or shared state is mutated.
//!
//! Integer arguments (`n`, `tau`, `dim`) are `usize`, so the compiler already
//! rejects non-integers. What remains at runtime is NaN / non-numeric input
//! (a type error) and out-of-bounds values (a range error).

use std::time::Duration;

use serde::Deserialize;

use crate::constants::{MIN_PERIOD_SECS, UNIT_MAX, UNIT_MIN};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{what} must be a number, got {found}")]
    NotNumeric { what: &'static str, found: String },

    #[error("{what} must be between {min} and {max} inclusive, got {value}")]
    OutOfRange {
        what: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("{what} must not be lower than {min}, got {value}")]
    BelowMinimum {
        what: &'static str,
        value: f64,
        min: f64,
    },

    #[error("dim must be less than {n}, got {dim}")]
    IndexOutOfRange { dim: usize, n: usize },

    #[error("target vector must be {expected}-dimensional, got {actual} elements")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Coarse classification of a [`ValidationError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// The value is not a number at all.
    Type,
    /// The value is a number but outside its allowed bounds.
    Range,
    /// A vector has the wrong number of elements.
    Length,
}

impl ValidationError {
    pub fn kind(&self) -> ValidationKind {
        match self {
            ValidationError::NotNumeric { .. } => ValidationKind::Type,
            ValidationError::OutOfRange { .. }
            | ValidationError::BelowMinimum { .. }
            | ValidationError::IndexOutOfRange { .. } => ValidationKind::Range,
            ValidationError::LengthMismatch { .. } => ValidationKind::Length,
        }
    }
}

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Dimension index check: `dim` must address one of the `n` model dimensions.
pub fn check_dim_index(dim: usize, n: usize) -> Result<usize> {
    if dim >= n {
        return Err(ValidationError::IndexOutOfRange { dim, n });
    }
    Ok(dim)
}

/// Scalar input check: a finite number in `[0, 1]`.
pub fn check_scalar_input(value: f64) -> Result<f64> {
    check_unit_interval("scalar input", value)
}

fn check_unit_interval(what: &'static str, value: f64) -> Result<f64> {
    if value.is_nan() {
        return Err(ValidationError::NotNumeric {
            what,
            found: "NaN".to_string(),
        });
    }
    if !(UNIT_MIN..=UNIT_MAX).contains(&value) {
        return Err(ValidationError::OutOfRange {
            what,
            value,
            min: UNIT_MIN,
            max: UNIT_MAX,
        });
    }
    Ok(value)
}

/// Period check: a finite number of seconds no lower than [`MIN_PERIOD_SECS`]
/// and small enough to fit a [`Duration`].
pub fn check_period(secs: f64) -> Result<Duration> {
    if !secs.is_finite() {
        return Err(ValidationError::NotNumeric {
            what: "period",
            found: secs.to_string(),
        });
    }
    if secs < MIN_PERIOD_SECS {
        return Err(ValidationError::BelowMinimum {
            what: "period",
            value: secs,
            min: MIN_PERIOD_SECS,
        });
    }
    Duration::try_from_secs_f64(secs).map_err(|_| ValidationError::OutOfRange {
        what: "period",
        value: secs,
        min: MIN_PERIOD_SECS,
        max: Duration::MAX.as_secs_f64(),
    })
}

/// Strictly positive size check, used for the model dimension `n` and window length `tau`.
pub fn check_positive(what: &'static str, value: usize) -> Result<usize> {
    if value == 0 {
        return Err(ValidationError::BelowMinimum {
            what,
            value: 0.0,
            min: 1.0,
        });
    }
    Ok(value)
}

/// Parse a published scalar (stringified float) back into a value.
pub fn parse_scalar(raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|_| ValidationError::NotNumeric {
            what: "published output",
            found: raw.to_string(),
        })
}

/// A query target as callers provide it: either one scalar (broadened to a
/// length-1 vector) or a full vector.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TargetVector {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl TargetVector {
    /// Interpret a loosely typed JSON value as a target vector.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::Number(num) => Ok(TargetVector::Scalar(json_number(num)?)),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| match item {
                    serde_json::Value::Number(num) => json_number(num),
                    other => Err(not_numeric_element(other)),
                })
                .collect::<Result<Vec<_>>>()
                .map(TargetVector::Vector),
            other => Err(ValidationError::NotNumeric {
                what: "target vector",
                found: other.to_string(),
            }),
        }
    }

    pub fn into_vec(self) -> Vec<f64> {
        match self {
            TargetVector::Scalar(value) => vec![value],
            TargetVector::Vector(values) => values,
        }
    }
}

fn json_number(num: &serde_json::Number) -> Result<f64> {
    num.as_f64().ok_or_else(|| ValidationError::NotNumeric {
        what: "target vector element",
        found: num.to_string(),
    })
}

fn not_numeric_element(value: &serde_json::Value) -> ValidationError {
    ValidationError::NotNumeric {
        what: "target vector element",
        found: value.to_string(),
    }
}

impl From<f64> for TargetVector {
    fn from(value: f64) -> Self {
        TargetVector::Scalar(value)
    }
}

impl From<Vec<f64>> for TargetVector {
    fn from(values: Vec<f64>) -> Self {
        TargetVector::Vector(values)
    }
}

impl From<&[f64]> for TargetVector {
    fn from(values: &[f64]) -> Self {
        TargetVector::Vector(values.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for TargetVector {
    fn from(values: [f64; N]) -> Self {
        TargetVector::Vector(values.to_vec())
    }
}

/// Target vector check: exactly `n` elements, each a number in `[0, 1]`.
pub fn check_target_vector(target: impl Into<TargetVector>, n: usize) -> Result<Vec<f64>> {
    let values = target.into().into_vec();
    check_target_slice(&values, n)?;
    Ok(values)
}

/// Same as [`check_target_vector`] for a borrowed slice.
pub fn check_target_slice(values: &[f64], n: usize) -> Result<()> {
    if values.len() != n {
        return Err(ValidationError::LengthMismatch {
            expected: n,
            actual: values.len(),
        });
    }
    for &value in values {
        check_unit_interval("target vector element", value)?;
    }
    Ok(())
}
