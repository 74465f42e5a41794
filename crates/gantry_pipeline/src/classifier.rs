//! Result classifier stage.

use gantry_core::{NodeState, truthy};
use gantry_engine::RunNode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Routes executed nodes by outcome.
///
/// Truthy results clear the node and unblock its dependents. Falsy results,
/// captured errors, and missing results go to the failure queue. Nodes in
/// `cancel` are dropped outright: they were reset mid-flight and the
/// re-schedule already owns their next lifecycle, so this stage neither
/// clears nor fails them.
pub struct ResultClassifier {
    classify_rx: mpsc::Receiver<Arc<RunNode>>,
    failure_tx: mpsc::Sender<Arc<RunNode>>,
}

impl ResultClassifier {
    /// Wire the stage between its queues
    #[must_use]
    pub fn new(
        classify_rx: mpsc::Receiver<Arc<RunNode>>,
        failure_tx: mpsc::Sender<Arc<RunNode>>,
    ) -> Self {
        Self {
            classify_rx,
            failure_tx,
        }
    }

    /// Consume the classify queue until it closes or the token fires
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let node = tokio::select! {
                () = cancel.cancelled() => break,
                node = self.classify_rx.recv() => match node {
                    Some(node) => node,
                    None => break,
                },
            };
            if node.state() == NodeState::Cancel {
                tracing::debug!(node = %node.id(), "dropping result of cancelled node");
                continue;
            }
            let passed = node.result().as_ref().is_some_and(truthy);
            if passed {
                node.set_cleared().await;
            } else if self.failure_tx.send(node).await.is_err() {
                tracing::error!("failure queue closed");
                break;
            }
        }
        tracing::debug!("classifier stage shutting down");
    }
}
