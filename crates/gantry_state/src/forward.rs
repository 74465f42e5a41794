//! Output forwarding workers.
//!
//! These sit between the state manager's output channels and the transport
//! collaborator: tc-data records fan out to every session, prompts go to the
//! controlling client only.

use crate::message::{PromptMessage, TcDataMessage};
use crate::transport::Transport;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Fans tc-data records out to all connected sessions
pub struct TcDataBroadcaster {
    transport: Arc<dyn Transport>,
}

impl TcDataBroadcaster {
    /// Wire the broadcaster to the transport
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Consume the tc-data queue until it closes or the token fires
    pub async fn run(self, mut tc_data_rx: mpsc::Receiver<TcDataMessage>, cancel: CancellationToken) {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = tc_data_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let value = match serde_json::to_value(&message) {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(error = %err, "tc-data record failed to serialize");
                    continue;
                }
            };
            if let Err(err) = self.transport.broadcast(value).await {
                tracing::warn!(error = %err, "tc-data broadcast failed");
            }
        }
        tracing::debug!("tc-data broadcaster shutting down");
    }
}

/// Delivers user prompts to the controlling client
pub struct UiRequestForwarder {
    transport: Arc<dyn Transport>,
}

impl UiRequestForwarder {
    /// Wire the forwarder to the transport
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Consume the prompt queue until it closes or the token fires.
    ///
    /// A prompt with no controller connected is dropped with a warning; the
    /// interaction stays open and can still be answered if a controller
    /// reconnects and learns the id out of band.
    pub async fn run(
        self,
        mut ui_request_rx: mpsc::Receiver<PromptMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let prompt = tokio::select! {
                () = cancel.cancelled() => break,
                prompt = ui_request_rx.recv() => match prompt {
                    Some(prompt) => prompt,
                    None => break,
                },
            };
            let client = match self.transport.control_client() {
                Ok(client) => client,
                Err(err) => {
                    tracing::warn!(
                        interaction = %prompt.payload.id,
                        error = %err,
                        "prompt dropped, no controller"
                    );
                    continue;
                }
            };
            let value = match serde_json::to_value(&prompt) {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(error = %err, "prompt failed to serialize");
                    continue;
                }
            };
            if let Err(err) = self.transport.send(client, value).await {
                tracing::warn!(client = %client, error = %err, "prompt delivery failed");
            }
        }
        tracing::debug!("ui-request forwarder shutting down");
    }
}
