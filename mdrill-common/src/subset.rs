//! One-directional structural comparison.
//!
//! Cloud APIs return many more fields than a test declares, so configuration
//! checks ask whether the declared (`expected`) structure is contained in the
//! observed (`actual`) one:
//! - map against map: every expected key must exist in `actual` and match recursively
//! - list against list: lengths must be equal and items match pairwise
//! - scalar against scalar: equality, with numbers compared by value (`10 == 10.0`)

use std::fmt;

use serde_json::Value;

/// Why a subset check failed.
#[derive(Debug, Clone, PartialEq)]
pub enum MismatchReason {
    MissingKey,
    LengthMismatch { expected: usize, actual: usize },
    ShapeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    ValueMismatch { expected: Value, actual: Value },
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey => write!(f, "key is missing from the actual value"),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "expected {expected} item(s), found {actual}")
            }
            Self::ShapeMismatch { expected, actual } => {
                write!(f, "expected {expected}, found {actual}")
            }
            Self::ValueMismatch { expected, actual } => {
                write!(f, "expected {expected}, actual {actual}")
            }
        }
    }
}

/// First difference found while checking `expected ⊆ actual`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("not a subset at `{path}`: {reason}")]
pub struct SubsetMismatch {
    /// Dotted path to the offending field, `$` for the root.
    pub path: String,
    pub reason: MismatchReason,
}

/// Check that every field declared in `expected` matches `actual`.
pub fn assert_subset(actual: &Value, expected: &Value) -> Result<(), SubsetMismatch> {
    let mut path = String::from("$");
    check(actual, expected, &mut path)
}

pub fn is_subset(actual: &Value, expected: &Value) -> bool {
    assert_subset(actual, expected).is_ok()
}

fn check(actual: &Value, expected: &Value, path: &mut String) -> Result<(), SubsetMismatch> {
    match (expected, actual) {
        (Value::Object(expected_map), Value::Object(actual_map)) => {
            for (key, expected_value) in expected_map {
                let mark = path.len();
                path.push('.');
                path.push_str(key);
                let Some(actual_value) = actual_map.get(key) else {
                    return Err(mismatch(path, MismatchReason::MissingKey));
                };
                check(actual_value, expected_value, path)?;
                path.truncate(mark);
            }
            Ok(())
        }
        (Value::Array(expected_items), Value::Array(actual_items)) => {
            if expected_items.len() != actual_items.len() {
                return Err(mismatch(
                    path,
                    MismatchReason::LengthMismatch {
                        expected: expected_items.len(),
                        actual: actual_items.len(),
                    },
                ));
            }
            for (index, (expected_item, actual_item)) in
                expected_items.iter().zip(actual_items).enumerate()
            {
                let mark = path.len();
                path.push_str(&format!("[{index}]"));
                check(actual_item, expected_item, path)?;
                path.truncate(mark);
            }
            Ok(())
        }
        (Value::Object(_) | Value::Array(_), _) => Err(mismatch(
            path,
            MismatchReason::ShapeMismatch {
                expected: shape(expected),
                actual: shape(actual),
            },
        )),
        (Value::Number(expected_number), Value::Number(actual_number)) => {
            let equal = expected_number == actual_number
                || matches!(
                    (expected_number.as_f64(), actual_number.as_f64()),
                    (Some(e), Some(a)) if e == a
                );
            if equal {
                Ok(())
            } else {
                Err(value_mismatch(path, expected, actual))
            }
        }
        _ if expected == actual => Ok(()),
        _ => Err(value_mismatch(path, expected, actual)),
    }
}

fn shape(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a map",
    }
}

fn mismatch(path: &str, reason: MismatchReason) -> SubsetMismatch {
    SubsetMismatch {
        path: path.to_string(),
        reason,
    }
}

fn value_mismatch(path: &str, expected: &Value, actual: &Value) -> SubsetMismatch {
    mismatch(
        path,
        MismatchReason::ValueMismatch {
            expected: expected.clone(),
            actual: actual.clone(),
        },
    )
}
