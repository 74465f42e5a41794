//! System events.
//!
//! The closed set of domain events carried by the bus. Each kind fixes its
//! payload type; consumers match exhaustively, so a payload mismatch is
//! unrepresentable.

use crate::data_model::TestCaseDataModel;
use crate::interaction::InteractionContext;
use crate::node::RunNode;
use crate::parameter::ParameterSnapshot;
use crate::session::ViewSession;
use gantry_bus::{BusEvent, EventBus};
use gantry_core::{InteractionId, NodeState, NodeId, PanelId, TestRunId};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Subscription key for [`SystemEvent`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A test case was added to a run
    NewTestCase,
    /// A test case started a new execution
    NewTestExecution,
    /// A parameter measurement was recorded
    ParameterUpdate,
    /// A test case reported progress
    ProgressUpdate,
    /// A test case was quarantined
    TestCaseFail,
    /// A test run's terminal node cleared
    TestRunTermination,
    /// A node became ready for execution
    NodeReady,
    /// A running test case requested user input
    UserInteraction,
    /// The controller answered a user prompt
    UserResponse,
    /// A view session connected
    NewViewSession,
}

/// Payload of [`SystemEvent::NewTestExecution`]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ExecutionStarted {
    /// Test case id
    pub tc_id: NodeId,
    /// Execution id, numbered from zero
    pub execution_id: u32,
    /// Test case state at execution start
    pub tc_state: NodeState,
}

/// Payload of [`SystemEvent::ParameterUpdate`]
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ParameterRecorded {
    /// Test case id
    pub tc_id: NodeId,
    /// Execution the parameter belongs to
    pub execution_id: u32,
    /// The recorded measurement, keyed by parameter name
    pub parameter: indexmap::IndexMap<String, ParameterSnapshot>,
}

/// Payload of [`SystemEvent::TestCaseFail`]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TestCaseFailed {
    /// Quarantined test case id
    pub tc_id: NodeId,
}

/// Payload of [`SystemEvent::TestRunTermination`]
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TestRunFinished {
    /// The finished run
    pub tr_id: TestRunId,
    /// Panel the run was mounted on
    pub panel_id: PanelId,
}

/// Payload of [`SystemEvent::UserResponse`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserResponse {
    /// Correlation id of the prompt being answered
    pub id: InteractionId,
    /// The controller's answer
    pub response: Value,
}

/// A domain event
#[derive(Clone)]
pub enum SystemEvent {
    /// A test case was added to a run
    NewTestCase(Arc<TestCaseDataModel>),
    /// A test case started a new execution
    NewTestExecution(ExecutionStarted),
    /// A parameter measurement was recorded
    ParameterUpdate(ParameterRecorded),
    /// A test case reported progress
    ProgressUpdate(Arc<TestCaseDataModel>),
    /// A test case was quarantined
    TestCaseFail(TestCaseFailed),
    /// A test run's terminal node cleared
    TestRunTermination(TestRunFinished),
    /// A node became ready for execution
    NodeReady(Arc<RunNode>),
    /// A running test case requested user input
    UserInteraction(Arc<InteractionContext>),
    /// The controller answered a user prompt
    UserResponse(UserResponse),
    /// A view session connected
    NewViewSession(Arc<ViewSession>),
}

impl BusEvent for SystemEvent {
    type Kind = EventKind;

    fn kind(&self) -> EventKind {
        match self {
            Self::NewTestCase(_) => EventKind::NewTestCase,
            Self::NewTestExecution(_) => EventKind::NewTestExecution,
            Self::ParameterUpdate(_) => EventKind::ParameterUpdate,
            Self::ProgressUpdate(_) => EventKind::ProgressUpdate,
            Self::TestCaseFail(_) => EventKind::TestCaseFail,
            Self::TestRunTermination(_) => EventKind::TestRunTermination,
            Self::NodeReady(_) => EventKind::NodeReady,
            Self::UserInteraction(_) => EventKind::UserInteraction,
            Self::UserResponse(_) => EventKind::UserResponse,
            Self::NewViewSession(_) => EventKind::NewViewSession,
        }
    }
}

impl std::fmt::Debug for SystemEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NewTestCase(dm) => write!(f, "NewTestCase({})", dm.id()),
            Self::NewTestExecution(p) => write!(f, "NewTestExecution({p:?})"),
            Self::ParameterUpdate(p) => write!(f, "ParameterUpdate({p:?})"),
            Self::ProgressUpdate(dm) => write!(f, "ProgressUpdate({})", dm.id()),
            Self::TestCaseFail(p) => write!(f, "TestCaseFail({p:?})"),
            Self::TestRunTermination(p) => write!(f, "TestRunTermination({p:?})"),
            Self::NodeReady(node) => write!(f, "NodeReady({})", node.id()),
            Self::UserInteraction(ctx) => write!(f, "UserInteraction({})", ctx.id()),
            Self::UserResponse(p) => write!(f, "UserResponse({})", p.id),
            Self::NewViewSession(view) => write!(f, "NewViewSession({})", view.id()),
        }
    }
}

/// The bus instantiated over [`SystemEvent`]
pub type SystemBus = EventBus<SystemEvent>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_mapping() {
        let event = SystemEvent::TestCaseFail(TestCaseFailed { tc_id: NodeId::new() });
        assert_eq!(event.kind(), EventKind::TestCaseFail);

        let event = SystemEvent::UserResponse(UserResponse {
            id: InteractionId::new(),
            response: Value::Null,
        });
        assert_eq!(event.kind(), EventKind::UserResponse);
    }

    #[test]
    fn test_execution_started_serializes() {
        let payload = ExecutionStarted {
            tc_id: NodeId::from_bytes([1; 16]),
            execution_id: 0,
            tc_state: NodeState::Processing,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["execution_id"], 0);
        assert_eq!(json["tc_state"], "processing");
    }
}
