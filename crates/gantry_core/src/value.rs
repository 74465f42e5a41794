//! Result value semantics.
//!
//! Test-case bodies return arbitrary JSON values. The result classifier
//! treats a value as a pass iff it is truthy: null, `false`, zero, and empty
//! strings/arrays/objects all count as failures.

use serde_json::Value;

/// Whether a test-case result value counts as a pass
#[must_use]
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
