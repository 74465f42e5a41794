//! User-interaction rendezvous.
//!
//! A single outstanding prompt between a running test case and the
//! controlling client, correlated by id and resolved through a one-shot
//! latch.

use gantry_core::InteractionId;
use serde_json::Value;
use std::sync::Mutex;
use tokio::sync::Notify;

/// What kind of prompt an interaction carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// The test case needs a value entered by the operator
    InputRequest,
    /// The test case surfaces information, acknowledged with any response
    Notification,
    /// The test case needs a choice between offered options
    Decision,
}

impl InteractionKind {
    /// Wire name, e.g. `"input_request"`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InputRequest => "input_request",
            Self::Notification => "notification",
            Self::Decision => "decision",
        }
    }
}

/// One outstanding user prompt.
///
/// Created by a running test case, forwarded to the controller by the state
/// manager, and resolved by the matching response. The wait is cancel-safe:
/// dropping the future returned by [`response_ready`](Self::response_ready)
/// abandons the wait without consuming the latch. No deadline is enforced
/// here; an unanswered prompt blocks its test case until run teardown drops
/// the waiting future.
#[derive(Debug)]
pub struct InteractionContext {
    id: InteractionId,
    kind: InteractionKind,
    message: String,
    response: Mutex<Option<Value>>,
    latch: Notify,
}

impl InteractionContext {
    /// Create a new unresolved interaction
    #[must_use]
    pub fn new(kind: InteractionKind, message: impl Into<String>) -> Self {
        Self {
            id: InteractionId::new(),
            kind,
            message: message.into(),
            response: Mutex::new(None),
            latch: Notify::new(),
        }
    }

    /// Correlation id
    #[must_use]
    pub const fn id(&self) -> InteractionId {
        self.id
    }

    /// Prompt kind
    #[must_use]
    pub const fn kind(&self) -> InteractionKind {
        self.kind
    }

    /// Prompt message shown to the operator
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The response, if already resolved
    #[must_use]
    pub fn response(&self) -> Option<Value> {
        self.response.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Resolve the interaction and release every waiter.
    ///
    /// The first response wins; later calls are ignored and logged.
    pub fn resolve(&self, response: Value) {
        {
            let mut slot = self.response.lock().unwrap_or_else(|e| e.into_inner());
            if slot.is_some() {
                tracing::warn!(interaction = %self.id, "duplicate response ignored");
                return;
            }
            *slot = Some(response);
        }
        self.latch.notify_waiters();
    }

    /// Wait until the controller responds, then return the response.
    pub async fn response_ready(&self) -> Value {
        loop {
            let notified = self.latch.notified();
            tokio::pin!(notified);
            // enroll before checking the slot so a resolve in between wakes us
            notified.as_mut().enable();
            if let Some(value) = self.response() {
                return value;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_interaction_kind_wire_names() {
        assert_eq!(InteractionKind::InputRequest.as_str(), "input_request");
        assert_eq!(InteractionKind::Notification.as_str(), "notification");
        assert_eq!(InteractionKind::Decision.as_str(), "decision");
    }

    #[test]
    fn test_interaction_starts_unresolved() {
        let ctx = InteractionContext::new(InteractionKind::InputRequest, "pick one");
        assert_eq!(ctx.message(), "pick one");
        assert!(ctx.response().is_none());
    }

    #[tokio::test]
    async fn test_resolve_before_wait() {
        let ctx = InteractionContext::new(InteractionKind::InputRequest, "pick one");
        ctx.resolve(json!("ok"));
        assert_eq!(ctx.response_ready().await, json!("ok"));
    }

    #[tokio::test]
    async fn test_resolve_releases_waiter() {
        let ctx = Arc::new(InteractionContext::new(InteractionKind::Decision, "go?"));
        let waiter = {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move { ctx.response_ready().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        ctx.resolve(json!("yes"));

        let value = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, json!("yes"));
    }

    #[tokio::test]
    async fn test_first_response_wins() {
        let ctx = InteractionContext::new(InteractionKind::InputRequest, "value?");
        ctx.resolve(json!(1));
        ctx.resolve(json!(2));
        assert_eq!(ctx.response_ready().await, json!(1));
    }

    #[tokio::test]
    async fn test_wait_is_cancel_safe() {
        let ctx = Arc::new(InteractionContext::new(InteractionKind::InputRequest, "v?"));
        {
            let fut = ctx.response_ready();
            drop(fut);
        }
        ctx.resolve(json!("late"));
        assert_eq!(ctx.response_ready().await, json!("late"));
    }
}
