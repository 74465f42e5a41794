//! Node executor stage.

use gantry_engine::RunNode;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Reads ready nodes and spawns a task per execution, so independent nodes
/// run in parallel. Finished nodes are forwarded to the classify queue; if
/// that queue is gone the loss is logged and the worker carries on.
pub struct NodeExecutor {
    ready_rx: mpsc::Receiver<Arc<RunNode>>,
    classify_tx: mpsc::Sender<Arc<RunNode>>,
}

impl NodeExecutor {
    /// Wire the stage between its queues
    #[must_use]
    pub fn new(
        ready_rx: mpsc::Receiver<Arc<RunNode>>,
        classify_tx: mpsc::Sender<Arc<RunNode>>,
    ) -> Self {
        Self {
            ready_rx,
            classify_tx,
        }
    }

    /// Consume the ready queue until it closes or the token fires.
    ///
    /// In-flight executions keep their own clone of the classify sender, so
    /// the downstream stage stays open until the last of them finishes.
    pub async fn run(mut self, cancel: CancellationToken) {
        loop {
            let node = tokio::select! {
                () = cancel.cancelled() => break,
                node = self.ready_rx.recv() => match node {
                    Some(node) => node,
                    None => break,
                },
            };
            let classify_tx = self.classify_tx.clone();
            tokio::spawn(async move {
                node.execute().await;
                if classify_tx.send(Arc::clone(&node)).await.is_err() {
                    tracing::error!(node = %node.id(), "classify queue closed, result dropped");
                }
            });
        }
        tracing::debug!("executor stage shutting down");
    }
}
