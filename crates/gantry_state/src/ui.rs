//! UI response intake.
//!
//! The transport pushes decoded `ui-response` payloads onto a queue; this
//! worker surfaces each one as a [`SystemEvent::UserResponse`] so the state
//! manager can resolve the matching interaction.

use gantry_core::InteractionId;
use gantry_engine::{SystemBus, SystemEvent, UserResponse};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Decoded `ui-response` command payload
#[derive(Debug, Clone, Deserialize)]
pub struct UiResponseMessage {
    /// Correlation id of the prompt being answered
    pub id: InteractionId,
    /// The controller's answer
    pub response: Value,
}

/// Turns inbound response payloads into bus events
pub struct UiResponseWorker {
    bus: SystemBus,
}

impl UiResponseWorker {
    /// Wire the worker to the bus
    #[must_use]
    pub fn new(bus: SystemBus) -> Self {
        Self { bus }
    }

    /// Consume the response queue until it closes or the token fires
    pub async fn run(
        self,
        mut response_rx: mpsc::Receiver<UiResponseMessage>,
        cancel: CancellationToken,
    ) {
        loop {
            let message = tokio::select! {
                () = cancel.cancelled() => break,
                message = response_rx.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            tracing::info!(interaction = %message.id, "user response received");
            self.bus
                .publish(SystemEvent::UserResponse(UserResponse {
                    id: message.id,
                    response: message.response,
                }))
                .await;
        }
        tracing::debug!("ui-response worker shutting down");
    }
}
