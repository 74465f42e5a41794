//! Measured parameters.
//!
//! A parameter is one named measurement recorded within a test execution:
//! what was expected, what was measured, and whether that counts as a pass.

use serde::Serialize;
use serde_json::Value;

/// One named measurement within a test execution
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    description: String,
    expected: Value,
    measured: Value,
    result: bool,
}

impl Parameter {
    /// Create a parameter with no measurement yet
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            expected: Value::Null,
            measured: Value::Null,
            result: false,
        }
    }

    /// Record the expected value at measurement start
    #[must_use]
    pub fn start_measurement(mut self, expected: impl Into<Value>) -> Self {
        self.expected = expected.into();
        self
    }

    /// Record the measured value, description, and pass/fail outcome
    #[must_use]
    pub fn stop_measurement(
        mut self,
        measured: impl Into<Value>,
        description: impl Into<String>,
        result: bool,
    ) -> Self {
        self.measured = measured.into();
        self.description = description.into();
        self.result = result;
        self
    }

    /// Parameter name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pass/fail outcome
    #[must_use]
    pub const fn result(&self) -> bool {
        self.result
    }

    /// Expected value
    #[must_use]
    pub const fn expected(&self) -> &Value {
        &self.expected
    }

    /// Measured value
    #[must_use]
    pub const fn measured(&self) -> &Value {
        &self.measured
    }

    /// Observer-facing snapshot
    #[must_use]
    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            name: self.name.clone(),
            expected: self.expected.clone(),
            measured: self.measured.clone(),
            description: self.description.clone(),
            result: self.result,
            id: self.name.clone(),
        }
    }
}

/// Wire form of a parameter measurement
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParameterSnapshot {
    /// Parameter name
    pub name: String,
    /// Expected value
    pub expected: Value,
    /// Measured value
    pub measured: Value,
    /// Human description of the measurement
    pub description: String,
    /// Pass/fail outcome
    pub result: bool,
    /// Stable key, same as the name
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parameter_lifecycle() {
        let param = Parameter::new("vcc")
            .start_measurement(3.3)
            .stop_measurement(3.28, "rail within tolerance", true);

        assert_eq!(param.name(), "vcc");
        assert_eq!(param.expected(), &json!(3.3));
        assert_eq!(param.measured(), &json!(3.28));
        assert!(param.result());
    }

    #[test]
    fn test_parameter_snapshot_shape() {
        let param = Parameter::new("freq")
            .start_measurement(100)
            .stop_measurement(98, "off by two", false);
        let json = serde_json::to_value(param.snapshot()).unwrap();

        assert_eq!(json["name"], "freq");
        assert_eq!(json["id"], "freq");
        assert_eq!(json["expected"], 100);
        assert_eq!(json["measured"], 98);
        assert_eq!(json["description"], "off by two");
        assert_eq!(json["result"], false);
    }

    #[test]
    fn test_unmeasured_parameter_defaults() {
        let param = Parameter::new("ripple");
        assert_eq!(param.expected(), &Value::Null);
        assert_eq!(param.measured(), &Value::Null);
        assert!(!param.result());
    }
}
