//! Test runs.
//!
//! A test run owns an ordered list of test-case nodes plus one terminal node
//! that depends on every case, and a quarantine map of failed cases keyed by
//! id. Nodes live from profile load until the owning run is released.

use crate::data_model::RunBinding;
use crate::event::{SystemBus, SystemEvent, TestCaseFailed};
use crate::node::RunNode;
use crate::profile::Profile;
use gantry_core::{CoreError, CoreResult, NodeId, NodeState, PanelId, SessionId, TestRunId};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};

/// One execution of a profile's case set on one panel
pub struct TestRun {
    id: TestRunId,
    panel_id: PanelId,
    session_id: SessionId,
    bus: SystemBus,
    nodes: Mutex<Vec<Arc<RunNode>>>,
    failed: Mutex<IndexMap<NodeId, Arc<RunNode>>>,
    terminal: Arc<RunNode>,
}

impl TestRun {
    /// Create an empty run mounted on a panel
    #[must_use]
    pub fn new(panel_id: PanelId, session_id: SessionId, bus: &SystemBus) -> Arc<Self> {
        let id = TestRunId::new();
        let terminal = RunNode::terminal(bus);
        terminal.bind_terminal(id, panel_id);
        tracing::info!(run = %id, panel = %panel_id, "test run created");
        Arc::new(Self {
            id,
            panel_id,
            session_id,
            bus: bus.clone(),
            nodes: Mutex::new(Vec::new()),
            failed: Mutex::new(IndexMap::new()),
            terminal,
        })
    }

    /// Run id
    #[must_use]
    pub const fn id(&self) -> TestRunId {
        self.id
    }

    /// Panel the run is mounted on
    #[must_use]
    pub const fn panel_id(&self) -> PanelId {
        self.panel_id
    }

    /// Control session that owns the panel
    #[must_use]
    pub const fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// The run's terminal node
    #[must_use]
    pub fn terminal(&self) -> Arc<RunNode> {
        Arc::clone(&self.terminal)
    }

    /// Active test-case nodes, in insertion order
    #[must_use]
    pub fn tc_nodes(&self) -> Vec<Arc<RunNode>> {
        lock(&self.nodes).clone()
    }

    /// Quarantined node ids, in quarantine order
    #[must_use]
    pub fn failed_ids(&self) -> Vec<NodeId> {
        lock(&self.failed).keys().copied().collect()
    }

    /// Look up a quarantined node
    #[must_use]
    pub fn failed_node(&self, tc_id: NodeId) -> Option<Arc<RunNode>> {
        lock(&self.failed).get(&tc_id).cloned()
    }

    /// Add a test case to the run.
    ///
    /// Wires the terminal node's dependency, binds the case into the
    /// hierarchy, announces it, and checks its readiness. The announce
    /// precedes the readiness check so observers see the case before its
    /// first state transition.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] for terminal nodes and
    /// [`CoreError::CyclicDependency`] if the terminal wiring would close a
    /// cycle.
    pub async fn add_tc_node(self: &Arc<Self>, node: Arc<RunNode>) -> CoreResult<()> {
        let Some(data_model) = node.data_model() else {
            return Err(CoreError::Validation {
                field: "node".to_string(),
                reason: "only test-case nodes can be added to a run".to_string(),
            });
        };
        self.terminal.add_dependency(&node)?;
        lock(&self.nodes).push(Arc::clone(&node));
        node.bind_owner(
            self,
            RunBinding {
                tr_id: self.id,
                panel_id: self.panel_id,
                session_id: self.session_id,
            },
        );
        tracing::info!(run = %self.id, tc = %node.id(), name = %node.name(), "test case added");
        self.bus
            .publish(SystemEvent::NewTestCase(data_model))
            .await;
        node.check_and_schedule().await;
        Ok(())
    }

    /// Move a node from the active list into the failed map and announce the
    /// failure.
    pub async fn quarantine(self: &Arc<Self>, node: &Arc<RunNode>) {
        {
            let mut nodes = lock(&self.nodes);
            nodes.retain(|n| n.id() != node.id());
        }
        lock(&self.failed).insert(node.id(), Arc::clone(node));
        node.set_state(NodeState::Failed);
        tracing::warn!(run = %self.id, tc = %node.id(), name = %node.name(), "test case quarantined");
        self.bus
            .publish(SystemEvent::TestCaseFail(TestCaseFailed { tc_id: node.id() }))
            .await;
    }

    /// Pull a quarantined case back into the run for another attempt.
    ///
    /// The terminal node's dependency on the case still holds from its first
    /// life, so re-adding is the idempotent no-op path; the reset makes the
    /// case schedulable again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NotFound`] if the id is not quarantined.
    pub async fn retest(self: &Arc<Self>, tc_id: NodeId) -> CoreResult<()> {
        let node = lock(&self.failed)
            .shift_remove(&tc_id)
            .ok_or_else(|| CoreError::NotFound {
                kind: "failed test case".to_string(),
                id: tc_id.to_string(),
            })?;
        tracing::info!(run = %self.id, tc = %tc_id, "retesting quarantined case");
        node.reset_for_retest().await;
        self.add_tc_node(node).await
    }

    /// Load every case from a profile into the run, in profile order.
    ///
    /// # Errors
    ///
    /// Propagates the first `add_tc_node` failure.
    pub async fn load_test_cases(self: &Arc<Self>, profile: &dyn Profile) -> CoreResult<()> {
        for node in profile.test_case_list(&self.bus) {
            self.add_tc_node(node).await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TestRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestRun")
            .field("id", &self.id)
            .field("panel_id", &self.panel_id)
            .field("nodes", &lock(&self.nodes).len())
            .field("failed", &lock(&self.failed).len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
