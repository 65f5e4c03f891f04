//! Structural trace comparison
//!
//! Deep equality over recorded trace values with a human-readable path to
//! the first divergence. Arrays compare index-wise with an explicit
//! length-mismatch report, objects compare by key set then per key, and
//! everything else falls back to value equality.

use serde_json::Value;

/// First difference between two recorded values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mismatch {
    /// Path to the diverging field, e.g. `[12].Position[1]`.
    pub path: String,
    pub expected: String,
    pub actual: String,
}

impl Mismatch {
    fn new(path: impl Into<String>, expected: &impl ToString, actual: &impl ToString) -> Mismatch {
        Mismatch {
            path: path.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

/// Compares two values, reporting the first divergence. `path` seeds the
/// reported location, typically the frame index.
pub fn first_mismatch(path: &str, expected: &Value, actual: &Value) -> Option<Mismatch> {
    match (expected, actual) {
        (Value::Array(expected), Value::Array(actual)) => {
            if expected.len() != actual.len() {
                return Some(Mismatch::new(
                    format!("{path}<array_length_mismatch>"),
                    &expected.len(),
                    &actual.len(),
                ));
            }
            expected
                .iter()
                .zip(actual)
                .enumerate()
                .find_map(|(i, (e, a))| first_mismatch(&format!("{path}[{i}]"), e, a))
        }
        (Value::Object(expected), Value::Object(actual)) => {
            if expected.len() != actual.len() {
                return Some(Mismatch::new(
                    format!("{path}<dict_count>"),
                    &expected.len(),
                    &actual.len(),
                ));
            }
            expected.iter().find_map(|(key, e)| match actual.get(key) {
                None => Some(Mismatch::new(
                    format!("{path}<missing_key:{key}>"),
                    e,
                    &Value::Null,
                )),
                Some(a) => first_mismatch(&format!("{path}.{key}"), e, a),
            })
        }
        (expected, actual) if expected != actual => Some(Mismatch::new(path, expected, actual)),
        _ => None,
    }
}
