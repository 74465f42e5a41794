//! Application state manager.
//!
//! Holds the process-wide mutable state: the single control-session slot,
//! the session map keyed by transport handle, and the outstanding
//! interactions keyed by id. Subscribes one handler per event kind at
//! construction and fans each event out to the injected output channels.

use crate::message::{PromptMessage, PromptPayload, TcDataKind, TcDataMessage};
use crate::transport::Transport;
use gantry_core::{ClientId, CoreError, InteractionId};
use gantry_engine::{
    ControlSession, EventKind, InteractionContext, RunNode, SystemBus, SystemEvent, ViewSession,
};
use indexmap::IndexMap;
use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

/// State manager configuration
#[derive(Debug, Clone)]
pub struct StateConfig {
    /// Panels created per control session
    pub panel_limit: u32,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self { panel_limit: 1 }
    }
}

impl StateConfig {
    /// Override the panel limit
    #[must_use]
    pub const fn with_panel_limit(mut self, panel_limit: u32) -> Self {
        self.panel_limit = panel_limit;
        self
    }
}

/// What a newly added session became
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    /// The unique controlling session
    Control,
    /// A read-only observer
    View,
}

/// Output channels the manager emits into; injected by the composition root
pub struct StateOutputs {
    /// Observer-facing tc-data records
    pub tc_data_tx: mpsc::Sender<TcDataMessage>,
    /// Prompts bound for the controlling client
    pub ui_request_tx: mpsc::Sender<PromptMessage>,
    /// Ready nodes bound for the executor stage
    pub executor_tx: mpsc::Sender<Arc<RunNode>>,
}

enum SessionEntry {
    Control(Arc<ControlSession>),
    View(Arc<ViewSession>),
}

struct Inner {
    control: Option<Arc<ControlSession>>,
    sessions: IndexMap<ClientId, SessionEntry>,
    interactions: IndexMap<InteractionId, Arc<InteractionContext>>,
}

/// Keeper of the process-wide state
pub struct StateManager {
    bus: SystemBus,
    config: StateConfig,
    transport: Arc<dyn Transport>,
    outputs: StateOutputs,
    inner: Mutex<Inner>,
}

impl StateManager {
    /// Create the manager and register its event handlers
    #[must_use]
    pub fn new(
        bus: SystemBus,
        transport: Arc<dyn Transport>,
        outputs: StateOutputs,
        config: StateConfig,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            bus,
            config,
            transport,
            outputs,
            inner: Mutex::new(Inner {
                control: None,
                sessions: IndexMap::new(),
                interactions: IndexMap::new(),
            }),
        });
        manager.subscribe_handlers();
        manager
    }

    /// The current control session, if any
    #[must_use]
    pub fn control_session(&self) -> Option<Arc<ControlSession>> {
        lock(&self.inner).control.clone()
    }

    /// Number of connected sessions (control plus views)
    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.inner).sessions.len()
    }

    /// Number of unanswered prompts
    #[must_use]
    pub fn open_interactions(&self) -> usize {
        lock(&self.inner).interactions.len()
    }

    /// Register a connected client.
    ///
    /// The first client becomes the controller; every later one becomes a
    /// view session and triggers the initial replay via
    /// [`SystemEvent::NewViewSession`].
    pub async fn add_session(&self, client: ClientId) -> SessionRole {
        let view = {
            let mut inner = lock(&self.inner);
            if inner.control.is_none() {
                let control = ControlSession::new(client, self.config.panel_limit, &self.bus);
                tracing::info!(client = %client, session = %control.id(), "control session established");
                inner.control = Some(Arc::clone(&control));
                inner.sessions.insert(client, SessionEntry::Control(control));
                return SessionRole::Control;
            }
            let view = ViewSession::new(client);
            tracing::info!(client = %client, session = %view.id(), "view session established");
            inner
                .sessions
                .insert(client, SessionEntry::View(Arc::clone(&view)));
            view
        };
        self.bus.publish(SystemEvent::NewViewSession(view)).await;
        SessionRole::View
    }

    /// Unregister a disconnected client. Clears the control slot if the
    /// controller left.
    pub fn remove_session(&self, client: ClientId) {
        let mut inner = lock(&self.inner);
        if inner.sessions.shift_remove(&client).is_none() {
            tracing::warn!(client = %client, "disconnect for unknown session");
            return;
        }
        let was_control = inner
            .control
            .as_ref()
            .is_some_and(|control| control.client() == client);
        if was_control {
            inner.control = None;
            tracing::info!(client = %client, "control session closed");
        } else {
            tracing::info!(client = %client, "view session closed");
        }
    }

    fn subscribe_handlers(self: &Arc<Self>) {
        self.subscribe(EventKind::NewTestCase, Self::on_new_test_case);
        self.subscribe(EventKind::NewTestExecution, Self::on_new_execution);
        self.subscribe(EventKind::ParameterUpdate, Self::on_parameter_update);
        self.subscribe(EventKind::ProgressUpdate, Self::on_progress_update);
        self.subscribe(EventKind::TestCaseFail, Self::on_test_case_fail);
        self.subscribe(EventKind::TestRunTermination, Self::on_termination);
        self.subscribe(EventKind::NodeReady, Self::on_node_ready);
        self.subscribe(EventKind::UserInteraction, Self::on_user_interaction);
        self.subscribe(EventKind::UserResponse, Self::on_user_response);
        self.subscribe(EventKind::NewViewSession, Self::on_new_view_session);
    }

    fn subscribe<F, Fut>(self: &Arc<Self>, kind: EventKind, handler: F)
    where
        F: Fn(Arc<Self>, SystemEvent) -> Fut + Send + Sync + Copy + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let weak: Weak<Self> = Arc::downgrade(self);
        self.bus.subscribe(kind, move |event| {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(manager) => handler(manager, event).await,
                    None => Ok(()),
                }
            }
        });
    }

    async fn on_new_test_case(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::NewTestCase(data_model) = event else {
            anyhow::bail!("payload mismatch for NewTestCase");
        };
        let snapshot = data_model.snapshot()?;
        self.emit_tc_data(TcDataMessage::new(
            TcDataKind::NewTc,
            serde_json::to_value(snapshot)?,
        ))
        .await
    }

    async fn on_new_execution(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::NewTestExecution(payload) = event else {
            anyhow::bail!("payload mismatch for NewTestExecution");
        };
        self.emit_tc_data(TcDataMessage::new(
            TcDataKind::NewExecution,
            serde_json::to_value(payload)?,
        ))
        .await
    }

    async fn on_parameter_update(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::ParameterUpdate(payload) = event else {
            anyhow::bail!("payload mismatch for ParameterUpdate");
        };
        self.emit_tc_data(TcDataMessage::new(
            TcDataKind::ParameterUpdate,
            serde_json::to_value(payload)?,
        ))
        .await
    }

    async fn on_progress_update(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::ProgressUpdate(data_model) = event else {
            anyhow::bail!("payload mismatch for ProgressUpdate");
        };
        self.emit_tc_data(TcDataMessage::new(
            TcDataKind::ProgressUpdate,
            serde_json::json!({
                "tc_id": data_model.id(),
                "progress": data_model.progress(),
            }),
        ))
        .await
    }

    async fn on_test_case_fail(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::TestCaseFail(payload) = event else {
            anyhow::bail!("payload mismatch for TestCaseFail");
        };
        self.emit_tc_data(TcDataMessage::new(
            TcDataKind::TestCaseFail,
            serde_json::to_value(payload)?,
        ))
        .await
    }

    async fn on_termination(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::TestRunTermination(finished) = event else {
            anyhow::bail!("payload mismatch for TestRunTermination");
        };
        // release the finished run so the panel can mount a fresh one
        if let Some(control) = self.control_session() {
            for panel in control.panels() {
                if panel
                    .test_run()
                    .is_some_and(|run| run.id() == finished.tr_id)
                {
                    panel.remove_test_run();
                }
            }
        }
        self.emit_tc_data(TcDataMessage::without_payload(TcDataKind::TestRunTermination))
            .await
    }

    async fn on_node_ready(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::NodeReady(node) = event else {
            anyhow::bail!("payload mismatch for NodeReady");
        };
        self.outputs
            .executor_tx
            .send(node)
            .await
            .map_err(|_| CoreError::ChannelClosed {
                channel: "executor".to_string(),
            })?;
        Ok(())
    }

    async fn on_user_interaction(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::UserInteraction(ctx) = event else {
            anyhow::bail!("payload mismatch for UserInteraction");
        };
        lock(&self.inner)
            .interactions
            .insert(ctx.id(), Arc::clone(&ctx));
        let prompt = PromptMessage::new(PromptPayload {
            id: ctx.id(),
            message: ctx.message().to_string(),
            prompt_type: ctx.kind(),
        });
        self.outputs
            .ui_request_tx
            .send(prompt)
            .await
            .map_err(|_| CoreError::ChannelClosed {
                channel: "ui_request".to_string(),
            })?;
        Ok(())
    }

    async fn on_user_response(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::UserResponse(response) = event else {
            anyhow::bail!("payload mismatch for UserResponse");
        };
        let ctx = lock(&self.inner).interactions.shift_remove(&response.id);
        let Some(ctx) = ctx else {
            anyhow::bail!("response for unknown interaction {}", response.id);
        };
        ctx.resolve(response.response);
        Ok(())
    }

    async fn on_new_view_session(self: Arc<Self>, event: SystemEvent) -> anyhow::Result<()> {
        let SystemEvent::NewViewSession(view) = event else {
            anyhow::bail!("payload mismatch for NewViewSession");
        };
        let Some(control) = self.control_session() else {
            return Ok(());
        };
        for panel in control.panels() {
            let Some(run) = panel.test_run() else {
                continue;
            };
            for node in run.tc_nodes() {
                let Some(data_model) = node.data_model() else {
                    continue;
                };
                let message = TcDataMessage::new(
                    TcDataKind::NewTc,
                    serde_json::to_value(data_model.snapshot()?)?,
                );
                if let Err(err) = self
                    .transport
                    .send(view.client(), serde_json::to_value(&message)?)
                    .await
                {
                    tracing::warn!(view = %view.id(), error = %err, "initial replay send failed");
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    async fn emit_tc_data(&self, message: TcDataMessage) -> anyhow::Result<()> {
        self.outputs
            .tc_data_tx
            .send(message)
            .await
            .map_err(|_| CoreError::ChannelClosed {
                channel: "tc_data".to_string(),
            })?;
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
