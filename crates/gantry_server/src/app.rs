//! Application wiring.
//!
//! Owns channel construction (every queue bounded at the same capacity),
//! spawns the stage workers and side-effect workers into one supervised set,
//! and tears them down by closing producer ends first so consumers drain.

use gantry_core::ClientId;
use gantry_engine::{Profile, SystemBus};
use gantry_pipeline::{Pipeline, PipelineConfig};
use gantry_state::{
    CommandDispatcher, CommandMessage, SessionRole, StateConfig, StateManager, StateOutputs,
    TcDataBroadcaster, Transport, UiRequestForwarder, UiResponseMessage, UiResponseWorker,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Capacity of every internal queue
    pub channel_capacity: usize,
    /// Panels created for the control session
    pub panel_limit: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 50,
            panel_limit: 1,
        }
    }
}

impl AppConfig {
    /// Override the queue capacity
    #[must_use]
    pub const fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Override the panel limit
    #[must_use]
    pub const fn with_panel_limit(mut self, panel_limit: u32) -> Self {
        self.panel_limit = panel_limit;
        self
    }
}

/// The assembled orchestration core
pub struct Application {
    bus: SystemBus,
    state: Arc<StateManager>,
    transport: Arc<dyn Transport>,
    command_tx: mpsc::Sender<CommandMessage>,
    ui_response_tx: mpsc::Sender<UiResponseMessage>,
    cancel: CancellationToken,
    workers: JoinSet<()>,
}

impl Application {
    /// Build and start every component.
    ///
    /// Workers begin consuming immediately; feed commands through
    /// [`command_sender`](Self::command_sender) and responses through
    /// [`ui_response_sender`](Self::ui_response_sender).
    #[must_use]
    pub fn new(
        profile: Arc<dyn Profile>,
        transport: Arc<dyn Transport>,
        config: &AppConfig,
    ) -> Self {
        let bus = SystemBus::new();
        let pipeline = Pipeline::new(&PipelineConfig {
            queue_capacity: config.channel_capacity,
        });
        let (tc_data_tx, tc_data_rx) = mpsc::channel(config.channel_capacity);
        let (ui_request_tx, ui_request_rx) = mpsc::channel(config.channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(config.channel_capacity);
        let (ui_response_tx, ui_response_rx) = mpsc::channel(config.channel_capacity);

        let state = StateManager::new(
            bus.clone(),
            Arc::clone(&transport),
            StateOutputs {
                tc_data_tx,
                ui_request_tx,
                executor_tx: pipeline.ready_tx,
            },
            StateConfig::default().with_panel_limit(config.panel_limit),
        );

        let cancel = CancellationToken::new();
        let mut workers = JoinSet::new();
        workers.spawn(pipeline.executor.run(cancel.child_token()));
        workers.spawn(pipeline.classifier.run(cancel.child_token()));
        workers.spawn(pipeline.failure.run(cancel.child_token()));
        workers.spawn(
            CommandDispatcher::new(Arc::clone(&state), profile)
                .run(command_rx, cancel.child_token()),
        );
        workers.spawn(UiResponseWorker::new(bus.clone()).run(ui_response_rx, cancel.child_token()));
        workers.spawn(
            TcDataBroadcaster::new(Arc::clone(&transport)).run(tc_data_rx, cancel.child_token()),
        );
        workers.spawn(
            UiRequestForwarder::new(Arc::clone(&transport))
                .run(ui_request_rx, cancel.child_token()),
        );
        tracing::info!("application workers started");

        Self {
            bus,
            state,
            transport,
            command_tx,
            ui_response_tx,
            cancel,
            workers,
        }
    }

    /// The shared event bus
    #[must_use]
    pub const fn bus(&self) -> &SystemBus {
        &self.bus
    }

    /// The state manager
    #[must_use]
    pub fn state(&self) -> Arc<StateManager> {
        Arc::clone(&self.state)
    }

    /// The transport collaborator
    #[must_use]
    pub fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Input side of the command queue
    #[must_use]
    pub fn command_sender(&self) -> mpsc::Sender<CommandMessage> {
        self.command_tx.clone()
    }

    /// Input side of the ui-response queue
    #[must_use]
    pub fn ui_response_sender(&self) -> mpsc::Sender<UiResponseMessage> {
        self.ui_response_tx.clone()
    }

    /// Register a connected client with the state manager
    pub async fn connect(&self, client: ClientId) -> SessionRole {
        self.state.add_session(client).await
    }

    /// Unregister a disconnected client
    pub fn disconnect(&self, client: ClientId) {
        self.state.remove_session(client);
    }

    /// Orderly shutdown: cancel the workers' token, close the producer
    /// ends so every stage can finish its current item, then reap the
    /// workers. Stragglers are aborted after a grace period.
    pub async fn shutdown(self) {
        let Self {
            bus: _,
            state,
            transport: _,
            command_tx,
            ui_response_tx,
            cancel,
            mut workers,
        } = self;
        cancel.cancel();
        drop(command_tx);
        drop(ui_response_tx);
        drop(state);

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while workers.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            tracing::warn!("workers did not stop in time, aborting the rest");
            workers.shutdown().await;
        }
        tracing::info!("application stopped");
    }
}
