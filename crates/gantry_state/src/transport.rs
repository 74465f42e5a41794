//! Transport collaborator interface.
//!
//! The wire transport lives outside the core; these are the operations the
//! core consumes. Delivery is best-effort: a transport that fails to reach a
//! session is expected to remove that session itself.

use async_trait::async_trait;
use gantry_core::{ClientId, CoreError, CoreResult};
use serde_json::Value;
use std::sync::Mutex;

/// Operations the core needs from the wire transport
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a message to one session, best-effort
    async fn send(&self, client: ClientId, message: Value) -> CoreResult<()>;

    /// Send a message to every connected session, best-effort
    async fn broadcast(&self, message: Value) -> CoreResult<()>;

    /// Handle of the current controlling client
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoControlSession`] if no controller is connected.
    fn control_client(&self) -> CoreResult<ClientId>;
}

/// In-memory transport for tests and headless runs. Records everything it is
/// asked to deliver.
#[derive(Default)]
pub struct RecordingTransport {
    control: Mutex<Option<ClientId>>,
    sent: Mutex<Vec<(ClientId, Value)>>,
    broadcasts: Mutex<Vec<Value>>,
}

impl RecordingTransport {
    /// Create an empty transport with no controller
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the controlling client handle
    pub fn set_control_client(&self, client: ClientId) {
        *lock(&self.control) = Some(client);
    }

    /// Forget the controlling client handle
    pub fn clear_control_client(&self) {
        *lock(&self.control) = None;
    }

    /// Everything sent to a specific client, in order
    #[must_use]
    pub fn sent_to(&self, client: ClientId) -> Vec<Value> {
        lock(&self.sent)
            .iter()
            .filter(|(target, _)| *target == client)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Every broadcast message, in order
    #[must_use]
    pub fn broadcasts(&self) -> Vec<Value> {
        lock(&self.broadcasts).clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, client: ClientId, message: Value) -> CoreResult<()> {
        lock(&self.sent).push((client, message));
        Ok(())
    }

    async fn broadcast(&self, message: Value) -> CoreResult<()> {
        lock(&self.broadcasts).push(message);
        Ok(())
    }

    fn control_client(&self) -> CoreResult<ClientId> {
        lock(&self.control).ok_or(CoreError::NoControlSession)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
