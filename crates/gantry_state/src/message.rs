//! Outbound message shapes.
//!
//! The state manager emits these records; the transport collaborator
//! serializes them to JSON and fans them out to sessions.

use gantry_core::InteractionId;
use gantry_engine::InteractionKind;
use serde::Serialize;
use serde_json::Value;

/// `event_type` of a tc-data message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TcDataKind {
    /// A test case joined a run (or is being replayed to a new view)
    #[serde(rename = "newTC")]
    NewTc,
    /// A test case started a new execution
    #[serde(rename = "newExecution")]
    NewExecution,
    /// A parameter measurement was recorded
    #[serde(rename = "parameterUpdate")]
    ParameterUpdate,
    /// A test case reported progress
    #[serde(rename = "progressUpdate")]
    ProgressUpdate,
    /// A test case was quarantined
    #[serde(rename = "testCaseFail")]
    TestCaseFail,
    /// A test run finished
    #[serde(rename = "testRunTermination")]
    TestRunTermination,
}

/// One tc-data record bound for observers
#[derive(Debug, Clone, Serialize)]
pub struct TcDataMessage {
    /// Always `"tc_data"`
    #[serde(rename = "type")]
    pub message_type: &'static str,
    /// What happened
    pub event_type: TcDataKind,
    /// Kind-specific payload; absent for run termination
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl TcDataMessage {
    /// A record with a payload
    #[must_use]
    pub const fn new(event_type: TcDataKind, payload: Value) -> Self {
        Self {
            message_type: "tc_data",
            event_type,
            payload: Some(payload),
        }
    }

    /// A record without a payload
    #[must_use]
    pub const fn without_payload(event_type: TcDataKind) -> Self {
        Self {
            message_type: "tc_data",
            event_type,
            payload: None,
        }
    }
}

/// Payload of an outbound user prompt
#[derive(Debug, Clone, Serialize)]
pub struct PromptPayload {
    /// Correlation id the response must echo
    pub id: InteractionId,
    /// Prompt message shown to the operator
    pub message: String,
    /// Kind of prompt
    pub prompt_type: InteractionKind,
}

/// One user prompt bound for the controlling client
#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    /// Always `"app_state"`
    #[serde(rename = "type")]
    pub message_type: &'static str,
    /// Always `"prompt"`
    pub event_type: &'static str,
    /// The prompt itself
    pub payload: PromptPayload,
}

impl PromptMessage {
    /// Build a prompt record
    #[must_use]
    pub const fn new(payload: PromptPayload) -> Self {
        Self {
            message_type: "app_state",
            event_type: "prompt",
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tc_data_message_shape() {
        let message = TcDataMessage::new(TcDataKind::ProgressUpdate, json!({"progress": 50}));
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "tc_data");
        assert_eq!(value["event_type"], "progressUpdate");
        assert_eq!(value["payload"]["progress"], 50);
    }

    #[test]
    fn test_termination_has_no_payload() {
        let message = TcDataMessage::without_payload(TcDataKind::TestRunTermination);
        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["event_type"], "testRunTermination");
        assert!(value.get("payload").is_none());
    }

    #[test]
    fn test_event_type_names() {
        for (kind, name) in [
            (TcDataKind::NewTc, "newTC"),
            (TcDataKind::NewExecution, "newExecution"),
            (TcDataKind::ParameterUpdate, "parameterUpdate"),
            (TcDataKind::ProgressUpdate, "progressUpdate"),
            (TcDataKind::TestCaseFail, "testCaseFail"),
            (TcDataKind::TestRunTermination, "testRunTermination"),
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), json!(name));
        }
    }

    #[test]
    fn test_prompt_message_shape() {
        let prompt = PromptMessage::new(PromptPayload {
            id: InteractionId::new(),
            message: "pick one".to_string(),
            prompt_type: InteractionKind::InputRequest,
        });
        let value = serde_json::to_value(&prompt).unwrap();
        assert_eq!(value["type"], "app_state");
        assert_eq!(value["event_type"], "prompt");
        assert_eq!(value["payload"]["message"], "pick one");
        assert_eq!(value["payload"]["prompt_type"], "input_request");
    }
}
