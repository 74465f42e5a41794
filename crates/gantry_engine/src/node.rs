//! Schedulable nodes and the dependency DAG.
//!
//! A node is a single unit of schedulable work. Dependency edges and their
//! inverse dependent edges are kept in sync on the nodes themselves;
//! dependents are held weakly so the run's ownership of its nodes is the only
//! strong cycle-free path through the graph. State mutations commit under
//! short lock sections and events publish after release, so no lock is ever
//! held across a suspension point.

use crate::data_model::{RunBinding, TestCaseDataModel};
use crate::event::{SystemBus, SystemEvent, TestRunFinished};
use crate::run::TestRun;
use futures::FutureExt;
use futures::future::BoxFuture;
use gantry_core::{CoreError, CoreResult, NodeId, NodeState, PanelId, TestRunId};
use indexmap::IndexMap;
use serde_json::Value;
use std::collections::{HashSet, VecDeque};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Outcome of one test-case body invocation
pub type TestCaseResult = anyhow::Result<Value>;

/// Arguments handed to a test-case body, built from its declared parameters
#[derive(Debug, Clone, Default)]
pub struct TestCaseArgs {
    model: Option<Arc<TestCaseDataModel>>,
    values: IndexMap<String, Value>,
}

impl TestCaseArgs {
    /// The owning data model, if the body declared a `DataModel` parameter.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Validation`] if no such parameter was declared.
    pub fn model(&self) -> CoreResult<Arc<TestCaseDataModel>> {
        self.model.clone().ok_or_else(|| CoreError::Validation {
            field: "params".to_string(),
            reason: "body did not declare a data-model parameter".to_string(),
        })
    }

    /// A dependency result by declared parameter name, `Null` if the
    /// dependency produced nothing
    #[must_use]
    pub fn value(&self, name: &str) -> Value {
        self.values.get(name).cloned().unwrap_or(Value::Null)
    }

    /// All injected values in declaration order
    #[must_use]
    pub fn values(&self) -> &IndexMap<String, Value> {
        &self.values
    }
}

/// Where one declared parameter of a test-case body comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamSource {
    /// The owning test case's data model
    DataModel,
    /// The result of the dependency whose `parameter_label` equals the
    /// declared name
    Dependency,
}

/// One declared parameter of a test-case body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    /// Declared parameter name
    pub name: String,
    /// Where the value comes from
    pub source: ParamSource,
}

impl ParamSpec {
    /// Declare a data-model parameter
    #[must_use]
    pub fn model(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ParamSource::DataModel,
        }
    }

    /// Declare a dependency-result parameter
    #[must_use]
    pub fn label(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: ParamSource::Dependency,
        }
    }
}

type AsyncBody = dyn Fn(TestCaseArgs) -> BoxFuture<'static, TestCaseResult> + Send + Sync;
type BlockingBody = dyn Fn(TestCaseArgs) -> TestCaseResult + Send + Sync;

/// The user-supplied body of a test case
#[derive(Clone)]
pub enum TestCaseBody {
    /// Awaited on the scheduler
    Async(Arc<AsyncBody>),
    /// Potentially blocking; offloaded to a dedicated worker thread
    Blocking(Arc<BlockingBody>),
}

impl TestCaseBody {
    /// Wrap an async closure
    pub fn from_async<F, Fut>(body: F) -> Self
    where
        F: Fn(TestCaseArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = TestCaseResult> + Send + 'static,
    {
        Self::Async(Arc::new(move |args| Box::pin(body(args))))
    }

    /// Wrap a blocking closure
    pub fn from_blocking<F>(body: F) -> Self
    where
        F: Fn(TestCaseArgs) -> TestCaseResult + Send + Sync + 'static,
    {
        Self::Blocking(Arc::new(body))
    }
}

impl std::fmt::Debug for TestCaseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Async(_) => f.write_str("TestCaseBody::Async"),
            Self::Blocking(_) => f.write_str("TestCaseBody::Blocking"),
        }
    }
}

/// Captured failure of one execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    /// Top-level error message
    pub message: String,
    /// Full error chain text
    pub traceback: String,
}

/// Test-case payload of a node
pub struct TestCaseNode {
    body: TestCaseBody,
    params: Vec<ParamSpec>,
    data_model: Arc<TestCaseDataModel>,
    auto_retry: AtomicU32,
    owner: Mutex<Weak<TestRun>>,
}

/// Terminal payload of a node: a dependency-only sink that announces run
/// termination once cleared. Carries only ids upward.
pub struct TerminalNode {
    binding: Mutex<Option<(TestRunId, PanelId)>>,
}

/// Node variant, a closed set
pub enum NodeKind {
    /// Wraps a user-supplied test-case body and its data model
    TestCase(TestCaseNode),
    /// Depends on every test case in a run; clearing it ends the run
    Terminal(TerminalNode),
}

/// Builder for test-case nodes
pub struct TestCaseBuilder {
    name: String,
    description: String,
    parameter_label: Option<String>,
    auto_retry: u32,
    params: Vec<ParamSpec>,
    body: TestCaseBody,
}

impl TestCaseBuilder {
    /// Start a test-case node with a name and body
    #[must_use]
    pub fn new(name: impl Into<String>, body: TestCaseBody) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameter_label: None,
            auto_retry: 1,
            params: Vec::new(),
            body,
        }
    }

    /// Set the human description
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Tag this node's result for keyed injection into dependents
    #[must_use]
    pub fn with_parameter_label(mut self, label: impl Into<String>) -> Self {
        self.parameter_label = Some(label.into());
        self
    }

    /// Override the automatic retry budget (default 1)
    #[must_use]
    pub const fn with_auto_retry(mut self, count: u32) -> Self {
        self.auto_retry = count;
        self
    }

    /// Declare a body parameter
    #[must_use]
    pub fn with_param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// Finish the node on the given bus
    #[must_use]
    pub fn build(self, bus: &SystemBus) -> Arc<RunNode> {
        let id = NodeId::new();
        let data_model = Arc::new(TestCaseDataModel::new(
            id,
            self.name.clone(),
            self.description,
            bus.clone(),
        ));
        let node = Arc::new(RunNode {
            id,
            name: self.name,
            parameter_label: self.parameter_label,
            bus: bus.clone(),
            state: Mutex::new(NodeState::NotProcessed),
            result: Mutex::new(None),
            failure: Mutex::new(None),
            dependencies: Mutex::new(Vec::new()),
            dependents: Mutex::new(Vec::new()),
            kind: NodeKind::TestCase(TestCaseNode {
                body: self.body,
                params: self.params,
                data_model,
                auto_retry: AtomicU32::new(self.auto_retry),
                owner: Mutex::new(Weak::new()),
            }),
        });
        tracing::debug!(node = %node.id, name = %node.name, "test-case node created");
        node
    }
}

/// One schedulable node in a test run
pub struct RunNode {
    id: NodeId,
    name: String,
    parameter_label: Option<String>,
    bus: SystemBus,
    state: Mutex<NodeState>,
    result: Mutex<Option<Value>>,
    failure: Mutex<Option<ExecutionFailure>>,
    dependencies: Mutex<Vec<Arc<RunNode>>>,
    dependents: Mutex<Vec<Weak<RunNode>>>,
    kind: NodeKind,
}

impl RunNode {
    /// Create a terminal node for a run. The run binds its ids after
    /// construction.
    #[must_use]
    pub fn terminal(bus: &SystemBus) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::new(),
            name: "test_run_terminal".to_string(),
            parameter_label: None,
            bus: bus.clone(),
            state: Mutex::new(NodeState::NotProcessed),
            result: Mutex::new(None),
            failure: Mutex::new(None),
            dependencies: Mutex::new(Vec::new()),
            dependents: Mutex::new(Vec::new()),
            kind: NodeKind::Terminal(TerminalNode {
                binding: Mutex::new(None),
            }),
        })
    }

    /// Stable identity
    #[must_use]
    pub const fn id(&self) -> NodeId {
        self.id
    }

    /// Human name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Result tag for keyed injection into dependents
    #[must_use]
    pub fn parameter_label(&self) -> Option<&str> {
        self.parameter_label.as_deref()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> NodeState {
        *lock(&self.state)
    }

    /// Set the state, mirroring it into the data model for test-case nodes
    pub fn set_state(&self, state: NodeState) {
        *lock(&self.state) = state;
        if let NodeKind::TestCase(tc) = &self.kind {
            tc.data_model.set_state(state);
        }
    }

    /// Whether this node unblocks its dependents
    #[must_use]
    pub fn is_cleared(&self) -> bool {
        self.state().is_cleared()
    }

    /// Result produced by the last execution, if any
    #[must_use]
    pub fn result(&self) -> Option<Value> {
        lock(&self.result).clone()
    }

    /// Captured failure of the last execution, if any
    #[must_use]
    pub fn failure(&self) -> Option<ExecutionFailure> {
        lock(&self.failure).clone()
    }

    /// Node variant
    #[must_use]
    pub const fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Whether this is the run's terminal node
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self.kind, NodeKind::Terminal(_))
    }

    /// The data model, for test-case nodes
    #[must_use]
    pub fn data_model(&self) -> Option<Arc<TestCaseDataModel>> {
        match &self.kind {
            NodeKind::TestCase(tc) => Some(Arc::clone(&tc.data_model)),
            NodeKind::Terminal(_) => None,
        }
    }

    /// Remaining automatic retries (always 0 for terminal nodes)
    #[must_use]
    pub fn auto_retry_count(&self) -> u32 {
        match &self.kind {
            NodeKind::TestCase(tc) => tc.auto_retry.load(Ordering::SeqCst),
            NodeKind::Terminal(_) => 0,
        }
    }

    /// Consume one retry. Returns whether a retry was available.
    #[must_use]
    pub fn consume_retry(&self) -> bool {
        match &self.kind {
            NodeKind::TestCase(tc) => tc
                .auto_retry
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
            NodeKind::Terminal(_) => false,
        }
    }

    /// Current dependencies, in insertion order
    #[must_use]
    pub fn dependencies(&self) -> Vec<Arc<RunNode>> {
        lock(&self.dependencies).clone()
    }

    /// Live dependents, in insertion order
    #[must_use]
    pub fn dependents(&self) -> Vec<Arc<RunNode>> {
        lock(&self.dependents)
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Record that `self` requires `dependency` before it can run.
    ///
    /// Re-adding an existing edge is a logged no-op. On success the node
    /// falls back to `not_processed`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::CyclicDependency`] if the edge would close a
    /// cycle.
    pub fn add_dependency(self: &Arc<Self>, dependency: &Arc<RunNode>) -> CoreResult<()> {
        if lock(&self.dependencies)
            .iter()
            .any(|d| d.id == dependency.id)
        {
            tracing::debug!(
                node = %self.name,
                dependency = %dependency.name,
                "dependency already present"
            );
            return Ok(());
        }
        if self.reaches_through_dependents(dependency.id) {
            return Err(CoreError::CyclicDependency {
                from: self.name.clone(),
                to: dependency.name.clone(),
            });
        }
        lock(&self.dependencies).push(Arc::clone(dependency));
        lock(&dependency.dependents).push(Arc::downgrade(self));
        self.set_state(NodeState::NotProcessed);
        tracing::info!(
            node = %self.name,
            dependency = %dependency.name,
            "dependency added"
        );
        Ok(())
    }

    /// Remove a dependency edge and its inverse. No state change.
    pub fn remove_dependency(self: &Arc<Self>, dependency: &Arc<RunNode>) {
        lock(&self.dependencies).retain(|d| d.id != dependency.id);
        lock(&dependency.dependents)
            .retain(|w| w.upgrade().is_some_and(|d| d.id != self.id));
        tracing::info!(
            node = %self.name,
            dependency = %dependency.name,
            "dependency removed"
        );
    }

    /// DFS over dependent edges: is `target` downstream of `self`?
    fn reaches_through_dependents(self: &Arc<Self>, target: NodeId) -> bool {
        let mut visited = HashSet::new();
        let mut stack = vec![Arc::clone(self)];
        while let Some(node) = stack.pop() {
            if node.id == target {
                return true;
            }
            if !visited.insert(node.id) {
                continue;
            }
            for dependent in node.dependents() {
                if !visited.contains(&dependent.id) {
                    stack.push(dependent);
                }
            }
        }
        false
    }

    /// If every dependency is cleared, mark this node ready and announce it.
    ///
    /// A node already marked `ready` stays queued once; re-checking is a
    /// no-op so a reset followed by re-adding cannot double-queue it.
    pub async fn check_and_schedule(self: &Arc<Self>) {
        if self.state() == NodeState::Ready {
            tracing::debug!(node = %self.name, "already scheduled");
            return;
        }
        if !self.dependencies().iter().all(|d| d.is_cleared()) {
            return;
        }
        self.set_state(NodeState::Ready);
        tracing::info!(node = %self.name, "ready to process");
        self.bus
            .publish(SystemEvent::NodeReady(Arc::clone(self)))
            .await;
    }

    /// Mark this node cleared and re-check every dependent, in insertion
    /// order.
    pub async fn set_cleared(self: &Arc<Self>) {
        tracing::info!(node = %self.name, "node cleared");
        self.set_state(NodeState::Cleared);
        for dependent in self.dependents() {
            dependent.check_and_schedule().await;
        }
        self.on_cleared().await;
    }

    /// Variant-specific clearing hook
    async fn on_cleared(self: &Arc<Self>) {
        match &self.kind {
            NodeKind::TestCase(_) => {}
            NodeKind::Terminal(terminal) => {
                let binding = *lock(&terminal.binding);
                if let Some((tr_id, panel_id)) = binding {
                    self.bus
                        .publish(SystemEvent::TestRunTermination(TestRunFinished {
                            tr_id,
                            panel_id,
                        }))
                        .await;
                } else {
                    tracing::error!(node = %self.id, "terminal node cleared without a run binding");
                }
            }
        }
    }

    /// Reset this node and, transitively, every dependent.
    ///
    /// A node caught mid-execution is marked `cancel`: its in-flight result
    /// will be discarded by the classifier and the re-schedule owns its next
    /// lifecycle. Every other node loses its result and drops back to
    /// `not_processed`, then re-checks its own readiness.
    pub async fn reset(self: &Arc<Self>) {
        self.reset_from(true).await;
    }

    /// Reset for a retest: the node itself is not re-scheduled here, so the
    /// re-add can announce the case before its first state transition.
    /// Dependents reset as usual.
    pub(crate) async fn reset_for_retest(self: &Arc<Self>) {
        self.reset_from(false).await;
    }

    async fn reset_from(self: &Arc<Self>, schedule_self: bool) {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([Arc::clone(self)]);
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node.id) {
                continue;
            }
            if node.state() == NodeState::Processing {
                node.set_state(NodeState::Cancel);
                tracing::info!(node = %node.name, "node cancelled");
            } else {
                *lock(&node.result) = None;
                *lock(&node.failure) = None;
                node.set_state(NodeState::NotProcessed);
                tracing::info!(node = %node.name, "node reset");
                if schedule_self || node.id != self.id {
                    node.check_and_schedule().await;
                }
            }
            for dependent in node.dependents() {
                queue.push_back(dependent);
            }
        }
    }

    /// Execute this node's work.
    ///
    /// For test-case nodes: records a new execution, builds the declared
    /// arguments from the data model and dependency results, and invokes the
    /// body (awaited for async bodies, on a worker thread for blocking ones).
    /// Success lands in `result`; errors and panics are captured into the
    /// failure slot and flip the state to `error`. State transitions beyond
    /// that are the result classifier's job.
    pub async fn execute(self: &Arc<Self>) {
        match &self.kind {
            NodeKind::Terminal(_) => {
                self.set_state(NodeState::Processing);
                *lock(&self.result) = Some(Value::Bool(true));
                tracing::debug!(node = %self.id, "terminal node executed");
            }
            NodeKind::TestCase(tc) => {
                self.set_state(NodeState::Processing);
                tc.data_model.add_execution().await;
                let args = self.collect_args(tc);
                let started = std::time::Instant::now();
                let outcome = match &tc.body {
                    TestCaseBody::Async(body) => {
                        match AssertUnwindSafe(body(args)).catch_unwind().await {
                            Ok(result) => result,
                            Err(panic) => Err(anyhow::anyhow!(
                                "test case panicked: {}",
                                panic_message(panic.as_ref())
                            )),
                        }
                    }
                    TestCaseBody::Blocking(body) => {
                        let body = Arc::clone(body);
                        match tokio::task::spawn_blocking(move || body(args)).await {
                            Ok(result) => result,
                            Err(join_err) => {
                                Err(anyhow::anyhow!("test case worker failed: {join_err}"))
                            }
                        }
                    }
                };
                tc.data_model
                    .record_duration_ms(started.elapsed().as_secs_f64() * 1000.0);
                match outcome {
                    Ok(value) => {
                        *lock(&self.result) = Some(value);
                    }
                    Err(err) => {
                        tracing::error!(
                            node = %self.name,
                            error = %err,
                            "error while executing test case"
                        );
                        *lock(&self.failure) = Some(ExecutionFailure {
                            message: err.to_string(),
                            traceback: format!("{err:?}"),
                        });
                        self.set_state(NodeState::Error);
                    }
                }
            }
        }
    }

    /// Quarantine this test case into its owning run's failed map.
    ///
    /// # Errors
    ///
    /// Returns an error for terminal nodes or if the node was never added to
    /// a run.
    pub async fn quarantine(self: &Arc<Self>) -> CoreResult<()> {
        let NodeKind::TestCase(tc) = &self.kind else {
            return Err(CoreError::Validation {
                field: "kind".to_string(),
                reason: "only test-case nodes can be quarantined".to_string(),
            });
        };
        let owner = lock(&tc.owner).upgrade();
        let Some(run) = owner else {
            return Err(CoreError::Internal {
                message: format!("test case {} has no owning run", self.id),
            });
        };
        run.quarantine(self).await;
        Ok(())
    }

    /// Bind this test case to its owning run. Called by the run when the
    /// node is added.
    pub(crate) fn bind_owner(&self, run: &Arc<TestRun>, binding: RunBinding) {
        if let NodeKind::TestCase(tc) = &self.kind {
            *lock(&tc.owner) = Arc::downgrade(run);
            tc.data_model.bind(binding);
        }
    }

    /// Bind the terminal node's run ids. Called once at run construction.
    pub(crate) fn bind_terminal(&self, tr_id: TestRunId, panel_id: PanelId) {
        if let NodeKind::Terminal(terminal) = &self.kind {
            *lock(&terminal.binding) = Some((tr_id, panel_id));
        }
    }

    fn collect_args(&self, tc: &TestCaseNode) -> TestCaseArgs {
        let deps = self.dependencies();
        let mut model = None;
        let mut values = IndexMap::new();
        for spec in &tc.params {
            match spec.source {
                ParamSource::DataModel => model = Some(Arc::clone(&tc.data_model)),
                ParamSource::Dependency => {
                    let value = deps
                        .iter()
                        .find(|d| d.parameter_label() == Some(spec.name.as_str()))
                        .and_then(|d| d.result())
                        .unwrap_or(Value::Null);
                    values.insert(spec.name.clone(), value);
                }
            }
        }
        TestCaseArgs { model, values }
    }
}

impl std::fmt::Debug for RunNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .field("terminal", &self.is_terminal())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
