//! Failure handler stage.

use gantry_engine::RunNode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Decides the fate of failed nodes.
///
/// A test case with retries left is re-checked for scheduling, reusing the
/// normal execution path; an exhausted one is quarantined into its run's
/// failed map. Anything else that lands here is logged and dropped.
pub struct FailureHandler {
    failure_rx: mpsc::Receiver<Arc<RunNode>>,
}

impl FailureHandler {
    /// Wire the stage to its input queue
    #[must_use]
    pub fn new(failure_rx: mpsc::Receiver<Arc<RunNode>>) -> Self {
        Self { failure_rx }
    }

    /// Consume the failure queue until it closes or the token fires
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let node = tokio::select! {
                () = cancel.cancelled() => break,
                node = self.failure_rx.recv() => match node {
                    Some(node) => node,
                    None => break,
                },
            };
            if node.is_terminal() {
                tracing::warn!(node = %node.id(), "terminal node reached the failure stage, dropped");
                continue;
            }
            if node.consume_retry() {
                tracing::info!(
                    node = %node.id(),
                    name = %node.name(),
                    remaining = node.auto_retry_count(),
                    "retrying failed test case"
                );
                node.check_and_schedule().await;
            } else if let Err(err) = node.quarantine().await {
                tracing::error!(node = %node.id(), error = %err, "quarantine failed");
            }
        }
        tracing::debug!("failure stage shutting down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::{PanelId, SessionId};
    use gantry_engine::{
        EventKind, SystemBus, SystemEvent, TestCaseBody, TestCaseBuilder, TestRun,
    };
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::timeout;

    fn failing_case(name: &str, retries: u32, bus: &SystemBus) -> Arc<RunNode> {
        TestCaseBuilder::new(
            name,
            TestCaseBody::from_async(|_args| async { Ok(json!(false)) }),
        )
        .with_auto_retry(retries)
        .build(bus)
    }

    fn event_recorder(bus: &SystemBus, kind: EventKind) -> Arc<Mutex<Vec<SystemEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        bus.subscribe(kind, move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(event);
                Ok(())
            }
        });
        seen
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
    async fn test_retry_reschedules_node() {
        let bus = SystemBus::new();
        let ready = event_recorder(&bus, EventKind::NodeReady);
        let (failure_tx, failure_rx) = mpsc::channel(4);
        tokio::spawn(FailureHandler::new(failure_rx).run(CancellationToken::new()));

        let node = failing_case("flaky", 1, &bus);
        node.execute().await;
        failure_tx.send(Arc::clone(&node)).await.unwrap();

        wait_until(|| !ready.lock().unwrap().is_empty()).await;
        assert_eq!(node.auto_retry_count(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_node_is_quarantined() {
        let bus = SystemBus::new();
        let failures = event_recorder(&bus, EventKind::TestCaseFail);
        let run = TestRun::new(PanelId::new(1), SessionId::new(), &bus);
        let node = failing_case("doomed", 0, &bus);
        run.add_tc_node(Arc::clone(&node)).await.unwrap();

        let (failure_tx, failure_rx) = mpsc::channel(4);
        tokio::spawn(FailureHandler::new(failure_rx).run(CancellationToken::new()));

        node.execute().await;
        failure_tx.send(Arc::clone(&node)).await.unwrap();

        wait_until(|| !failures.lock().unwrap().is_empty()).await;
        assert_eq!(run.failed_ids(), vec![node.id()]);
        assert!(run.tc_nodes().is_empty());
    }

    #[tokio::test]
    async fn test_terminal_node_is_dropped() {
        let bus = SystemBus::new();
        let (failure_tx, failure_rx) = mpsc::channel(4);
        let worker = tokio::spawn(FailureHandler::new(failure_rx).run(CancellationToken::new()));

        let terminal = RunNode::terminal(&bus);
        failure_tx.send(terminal).await.unwrap();
        drop(failure_tx);

        timeout(Duration::from_secs(2), worker).await.unwrap().unwrap();
    }
}
