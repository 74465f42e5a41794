//! Node state machine vocabulary.
//!
//! Every schedulable node carries one of these states; test-case data models
//! mirror their node's state for observer snapshots. The wire form is
//! snake_case.

use serde::{Deserialize, Serialize};

/// State of a schedulable node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    /// Not yet eligible to run (dependencies outstanding or just reset)
    NotProcessed,
    /// All dependencies cleared; queued for execution
    Ready,
    /// Currently executing
    Processing,
    /// Terminal success; unblocks dependents
    Cleared,
    /// Result-level success marker used in observer reporting
    Passed,
    /// Quarantined after exhausting retries
    Failed,
    /// Reset while processing; the in-flight result will be discarded
    Cancel,
    /// Execution raised an error
    Error,
}

impl NodeState {
    /// Whether this state unblocks dependents
    #[must_use]
    pub const fn is_cleared(self) -> bool {
        matches!(self, Self::Cleared)
    }

    /// Whether this state ends a node's current lifecycle
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cleared | Self::Passed | Self::Failed)
    }

    /// Wire name, e.g. `"not_processed"`
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotProcessed => "not_processed",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Cleared => "cleared",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Cancel => "cancel",
            Self::Error => "error",
        }
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::NotProcessed
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
