//! Per-test-case data model.
//!
//! The data model is the only object serialized to observers. It tracks the
//! ordered executions of one test case, mirrors the owning node's state, and
//! publishes an event for every recorded change.

use crate::event::{ExecutionStarted, ParameterRecorded, SystemBus, SystemEvent};
use crate::interaction::{InteractionContext, InteractionKind};
use crate::parameter::{Parameter, ParameterSnapshot};
use chrono::{DateTime, Utc};
use gantry_core::{CoreError, CoreResult, NodeId, NodeState, PanelId, SessionId, TestRunId};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// One invocation of a test case's body
#[derive(Debug, Clone)]
pub struct TestExecution {
    execution_id: u32,
    started_at: DateTime<Utc>,
    duration_ms: f64,
    parameters: Vec<Parameter>,
    progress: u8,
}

impl TestExecution {
    fn new(execution_id: u32) -> Self {
        Self {
            execution_id,
            started_at: Utc::now(),
            duration_ms: 0.0,
            parameters: Vec::new(),
            progress: 0,
        }
    }

    /// Execution id, numbered from zero
    #[must_use]
    pub const fn execution_id(&self) -> u32 {
        self.execution_id
    }

    /// When the execution started
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Accumulated body runtime in milliseconds
    #[must_use]
    pub const fn duration_ms(&self) -> f64 {
        self.duration_ms
    }

    /// Progress in percent, 0 to 100
    #[must_use]
    pub const fn progress(&self) -> u8 {
        self.progress
    }

    /// Parameters recorded so far, in recording order
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    fn snapshot(&self) -> ExecutionSnapshot {
        let parameters = self
            .parameters
            .iter()
            .map(|p| (p.name().to_string(), p.snapshot()))
            .collect();
        ExecutionSnapshot {
            id: self.execution_id,
            name: format!("Execution {}", self.execution_id + 1),
            parameters,
        }
    }
}

/// Where a test case sits in the session hierarchy, stored as ids only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunBinding {
    /// Owning test run
    pub tr_id: TestRunId,
    /// Panel the run is mounted on
    pub panel_id: PanelId,
    /// Control session that owns the panel
    pub session_id: SessionId,
}

struct Inner {
    state: NodeState,
    executions: Vec<TestExecution>,
    binding: Option<RunBinding>,
}

/// Observable record of one test case.
pub struct TestCaseDataModel {
    tc_id: NodeId,
    name: String,
    description: String,
    bus: SystemBus,
    inner: Mutex<Inner>,
}

impl TestCaseDataModel {
    /// Create a data model for the given test case
    #[must_use]
    pub fn new(
        tc_id: NodeId,
        name: impl Into<String>,
        description: impl Into<String>,
        bus: SystemBus,
    ) -> Self {
        Self {
            tc_id,
            name: name.into(),
            description: description.into(),
            bus,
            inner: Mutex::new(Inner {
                state: NodeState::NotProcessed,
                executions: Vec::new(),
                binding: None,
            }),
        }
    }

    /// Test case id
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.tc_id
    }

    /// Test case name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Test case description
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Current state (mirrors the owning node)
    #[must_use]
    pub fn state(&self) -> NodeState {
        self.lock().state
    }

    /// Mirror the owning node's state
    pub fn set_state(&self, state: NodeState) {
        self.lock().state = state;
    }

    /// Progress of the current execution, or 0 before the first one
    #[must_use]
    pub fn progress(&self) -> u8 {
        self.lock().executions.last().map_or(0, TestExecution::progress)
    }

    /// Number of executions so far
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.lock().executions.len()
    }

    /// The hierarchy binding, if the case has been added to a run
    #[must_use]
    pub fn binding(&self) -> Option<RunBinding> {
        self.lock().binding
    }

    /// Bind the data model into the run hierarchy. The first bind wins;
    /// re-binding to the same run (retest) is a no-op.
    pub fn bind(&self, binding: RunBinding) {
        let mut inner = self.lock();
        if inner.binding.is_none() {
            inner.binding = Some(binding);
        }
    }

    /// Start a new execution and announce it. Returns the execution id.
    pub async fn add_execution(&self) -> u32 {
        let (execution_id, state) = {
            let mut inner = self.lock();
            let execution_id = u32::try_from(inner.executions.len()).unwrap_or(u32::MAX);
            inner.executions.push(TestExecution::new(execution_id));
            (execution_id, inner.state)
        };
        self.bus
            .publish(SystemEvent::NewTestExecution(ExecutionStarted {
                tc_id: self.tc_id,
                execution_id,
                tc_state: state,
            }))
            .await;
        execution_id
    }

    /// Record a parameter on the current execution and announce it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if no execution has started.
    pub async fn update_parameter(&self, parameter: Parameter) -> CoreResult<()> {
        let (execution_id, snapshot) = {
            let mut inner = self.lock();
            let execution = inner.executions.last_mut().ok_or_else(|| {
                CoreError::Validation {
                    field: "executions".to_string(),
                    reason: "no execution to record a parameter on".to_string(),
                }
            })?;
            let snapshot = parameter.snapshot();
            execution.parameters.push(parameter);
            (execution.execution_id, snapshot)
        };
        let mut keyed = IndexMap::new();
        keyed.insert(snapshot.name.clone(), snapshot);
        self.bus
            .publish(SystemEvent::ParameterUpdate(ParameterRecorded {
                tc_id: self.tc_id,
                execution_id,
                parameter: keyed,
            }))
            .await;
        Ok(())
    }

    /// Record progress on the current execution and announce it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if no execution has started or the
    /// value exceeds 100.
    pub async fn update_progress(self: &Arc<Self>, progress: u8) -> CoreResult<()> {
        if progress > 100 {
            return Err(CoreError::Validation {
                field: "progress".to_string(),
                reason: format!("progress {progress} out of range 0..=100"),
            });
        }
        {
            let mut inner = self.lock();
            let execution = inner.executions.last_mut().ok_or_else(|| {
                CoreError::Validation {
                    field: "executions".to_string(),
                    reason: "no execution to record progress on".to_string(),
                }
            })?;
            execution.progress = progress;
        }
        self.bus
            .publish(SystemEvent::ProgressUpdate(Arc::clone(self)))
            .await;
        Ok(())
    }

    /// Accumulate body runtime on the current execution
    pub fn record_duration_ms(&self, duration_ms: f64) {
        let mut inner = self.lock();
        if let Some(execution) = inner.executions.last_mut() {
            execution.duration_ms += duration_ms;
        }
    }

    /// Ask the controlling client for input and wait for the answer.
    ///
    /// Publishes a [`SystemEvent::UserInteraction`] and suspends until the
    /// matching response resolves the interaction. The wait is cancel-safe
    /// but has no deadline of its own.
    pub async fn user_input_request(&self, message: impl Into<String>) -> Value {
        let ctx = Arc::new(InteractionContext::new(
            InteractionKind::InputRequest,
            message,
        ));
        self.bus
            .publish(SystemEvent::UserInteraction(Arc::clone(&ctx)))
            .await;
        ctx.response_ready().await
    }

    /// Executions recorded so far
    #[must_use]
    pub fn executions(&self) -> Vec<TestExecution> {
        self.lock().executions.clone()
    }

    /// Observer-facing snapshot of the whole data model.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if the case was never bound to a run;
    /// snapshots are only meaningful inside the hierarchy.
    pub fn snapshot(&self) -> CoreResult<TestCaseSnapshot> {
        let inner = self.lock();
        let binding = inner.binding.ok_or_else(|| CoreError::Validation {
            field: "binding".to_string(),
            reason: format!("test case {} is not bound to a run", self.tc_id),
        })?;
        let executions = inner
            .executions
            .iter()
            .map(|e| (e.execution_id, e.snapshot()))
            .collect();
        Ok(TestCaseSnapshot {
            id: self.tc_id,
            name: self.name.clone(),
            tr_id: binding.tr_id,
            panel_id: binding.panel_id,
            session_id: binding.session_id,
            progress: inner.executions.last().map_or(0, TestExecution::progress),
            tc_state: inner.state,
            executions,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for TestCaseDataModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCaseDataModel")
            .field("tc_id", &self.tc_id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("executions", &self.execution_count())
            .finish()
    }
}

/// Wire form of one execution
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExecutionSnapshot {
    /// Execution id
    pub id: u32,
    /// Display name, `"Execution N"` numbered from one
    pub name: String,
    /// Parameters keyed by name, in recording order
    pub parameters: IndexMap<String, ParameterSnapshot>,
}

/// Wire form of a test case's data model
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TestCaseSnapshot {
    /// Test case id
    pub id: NodeId,
    /// Test case name
    pub name: String,
    /// Owning test run
    pub tr_id: TestRunId,
    /// Panel the run is mounted on
    pub panel_id: PanelId,
    /// Control session that owns the panel
    pub session_id: SessionId,
    /// Progress of the current execution
    pub progress: u8,
    /// Current state
    pub tc_state: NodeState,
    /// Executions keyed by execution id
    pub executions: IndexMap<u32, ExecutionSnapshot>,
}
