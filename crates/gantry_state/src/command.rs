//! Command dispatcher.
//!
//! Consumes inbound command messages and maps the recognized names to domain
//! actions. Unknown commands and recoverable errors (no controller, busy
//! panel, unknown test case) are logged and dropped; the dispatcher never
//! dies on a bad command.

use crate::manager::StateManager;
use gantry_core::{CoreError, CoreResult, NodeId};
use gantry_engine::Profile;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// One inbound command from the transport
#[derive(Debug, Clone, Deserialize)]
pub struct CommandMessage {
    /// Command name, e.g. `"loadTC"`
    pub command_type: String,
    /// Command-specific payload
    #[serde(default)]
    pub payload: Value,
}

impl CommandMessage {
    /// Build a command with a payload
    #[must_use]
    pub fn new(command_type: impl Into<String>, payload: Value) -> Self {
        Self {
            command_type: command_type.into(),
            payload,
        }
    }
}

/// Maps command names to domain actions
pub struct CommandDispatcher {
    state: Arc<StateManager>,
    profile: Arc<dyn Profile>,
}

impl CommandDispatcher {
    /// Wire the dispatcher to the state manager and the active profile
    #[must_use]
    pub fn new(state: Arc<StateManager>, profile: Arc<dyn Profile>) -> Self {
        Self { state, profile }
    }

    /// Consume the command queue until it closes or the token fires
    pub async fn run(self, mut command_rx: mpsc::Receiver<CommandMessage>, cancel: CancellationToken) {
        loop {
            let command = tokio::select! {
                () = cancel.cancelled() => break,
                command = command_rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };
            tracing::info!(command = %command.command_type, "command received");
            if let Err(err) = self.dispatch(&command).await {
                tracing::warn!(
                    command = %command.command_type,
                    error = %err,
                    "command dropped"
                );
            }
        }
        tracing::debug!("command dispatcher shutting down");
    }

    async fn dispatch(&self, command: &CommandMessage) -> CoreResult<()> {
        match command.command_type.as_str() {
            "loadTC" => self.load_test_cases().await,
            "retest" => {
                let tc_id = command
                    .payload
                    .get("tc_id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| CoreError::Validation {
                        field: "payload.tc_id".to_string(),
                        reason: "retest requires a tc_id".to_string(),
                    })?;
                self.retest(NodeId::parse(tc_id)?).await
            }
            unknown => {
                tracing::warn!(command = %unknown, "unknown command discarded");
                Ok(())
            }
        }
    }

    /// Mount a test run on every panel of the control session and load the
    /// profile's cases into it.
    async fn load_test_cases(&self) -> CoreResult<()> {
        let control = self
            .state
            .control_session()
            .ok_or(CoreError::NoControlSession)?;
        for panel in control.panels() {
            let run = panel.add_test_run()?;
            run.load_test_cases(self.profile.as_ref()).await?;
        }
        Ok(())
    }

    /// Retest a quarantined case on panel 0's current run
    async fn retest(&self, tc_id: NodeId) -> CoreResult<()> {
        let control = self
            .state
            .control_session()
            .ok_or(CoreError::NoControlSession)?;
        let panel = control
            .panels()
            .first()
            .cloned()
            .ok_or_else(|| CoreError::NotFound {
                kind: "panel".to_string(),
                id: "0".to_string(),
            })?;
        let run = panel.test_run().ok_or_else(|| CoreError::NotFound {
            kind: "test run".to_string(),
            id: panel.id().to_string(),
        })?;
        run.retest(tc_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{StateConfig, StateOutputs};
    use crate::transport::{RecordingTransport, Transport};
    use gantry_core::ClientId;
    use gantry_engine::{RunNode, SystemBus, TestCaseBody, TestCaseBuilder};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    struct Harness {
        bus: SystemBus,
        manager: Arc<StateManager>,
        command_tx: mpsc::Sender<CommandMessage>,
    }

    struct OneCase;

    impl Profile for OneCase {
        fn test_case_list(&self, bus: &SystemBus) -> Vec<Arc<RunNode>> {
            vec![
                TestCaseBuilder::new(
                    "only",
                    TestCaseBody::from_async(|_args| async { Ok(json!(true)) }),
                )
                .build(bus),
            ]
        }
    }

    fn make_harness() -> Harness {
        let bus = SystemBus::new();
        let transport = Arc::new(RecordingTransport::new());
        let (tc_data_tx, mut tc_data_rx) = mpsc::channel(64);
        let (ui_request_tx, _ui_request_rx) = mpsc::channel(16);
        let (executor_tx, mut executor_rx) = mpsc::channel(64);
        // keep the output queues draining in the background
        tokio::spawn(async move { while tc_data_rx.recv().await.is_some() {} });
        tokio::spawn(async move { while executor_rx.recv().await.is_some() {} });

        let manager = StateManager::new(
            bus.clone(),
            transport as Arc<dyn Transport>,
            StateOutputs {
                tc_data_tx,
                ui_request_tx,
                executor_tx,
            },
            StateConfig::default(),
        );
        let dispatcher = CommandDispatcher::new(Arc::clone(&manager), Arc::new(OneCase));
        let (command_tx, command_rx) = mpsc::channel(16);
        tokio::spawn(dispatcher.run(command_rx, CancellationToken::new()));
        Harness {
            bus,
            manager,
            command_tx,
        }
    }

    async fn wait_until(check: impl Fn() -> bool) {
        timeout(Duration::from_secs(2), async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[tokio::test]
    async fn test_load_tc_mounts_run_and_loads_profile() {
        let harness = make_harness();
        harness.manager.add_session(ClientId::new()).await;

        harness
            .command_tx
            .send(CommandMessage::new("loadTC", json!({})))
            .await
            .unwrap();

        let manager = Arc::clone(&harness.manager);
        wait_until(move || {
            manager
                .control_session()
                .and_then(|control| control.panels()[0].test_run())
                .is_some_and(|run| run.tc_nodes().len() == 1)
        })
        .await;
    }

    #[tokio::test]
    async fn test_load_tc_without_controller_is_dropped() {
        let harness = make_harness();

        harness
            .command_tx
            .send(CommandMessage::new("loadTC", json!({})))
            .await
            .unwrap();
        // dispatcher survives and processes the next command
        harness.manager.add_session(ClientId::new()).await;
        harness
            .command_tx
            .send(CommandMessage::new("loadTC", json!({})))
            .await
            .unwrap();

        let manager = Arc::clone(&harness.manager);
        wait_until(move || {
            manager
                .control_session()
                .and_then(|control| control.panels()[0].test_run())
                .is_some()
        })
        .await;
    }

    #[tokio::test]
    async fn test_unknown_command_is_discarded() {
        let harness = make_harness();
        harness.manager.add_session(ClientId::new()).await;

        harness
            .command_tx
            .send(CommandMessage::new("selfDestruct", json!({})))
            .await
            .unwrap();
        harness
            .command_tx
            .send(CommandMessage::new("loadTC", json!({})))
            .await
            .unwrap();

        let manager = Arc::clone(&harness.manager);
        wait_until(move || {
            manager
                .control_session()
                .and_then(|control| control.panels()[0].test_run())
                .is_some()
        })
        .await;
    }

    #[tokio::test]
    async fn test_retest_requires_tc_id() {
        let harness = make_harness();
        harness.manager.add_session(ClientId::new()).await;
        // malformed retest must not kill the dispatcher
        harness
            .command_tx
            .send(CommandMessage::new("retest", json!({})))
            .await
            .unwrap();
        harness
            .command_tx
            .send(CommandMessage::new("loadTC", json!({})))
            .await
            .unwrap();

        let manager = Arc::clone(&harness.manager);
        wait_until(move || {
            manager
                .control_session()
                .and_then(|control| control.panels()[0].test_run())
                .is_some()
        })
        .await;
    }

    #[tokio::test]
    async fn test_retest_pulls_case_from_failed_map() {
        let harness = make_harness();
        harness.manager.add_session(ClientId::new()).await;
        let control = harness.manager.control_session().unwrap();
        let run = control.panels()[0].add_test_run().unwrap();
        let node = TestCaseBuilder::new(
            "flaky",
            TestCaseBody::from_async(|_args| async { Ok(json!(false)) }),
        )
        .build(&harness.bus);
        run.add_tc_node(Arc::clone(&node)).await.unwrap();
        run.quarantine(&node).await;
        assert_eq!(run.failed_ids(), vec![node.id()]);

        harness
            .command_tx
            .send(CommandMessage::new(
                "retest",
                json!({"tc_id": node.id().as_hex()}),
            ))
            .await
            .unwrap();

        let run_probe = Arc::clone(&run);
        wait_until(move || run_probe.failed_ids().is_empty()).await;
        assert_eq!(run.tc_nodes().len(), 1);
    }
}
