//! Test profiles.
//!
//! A profile is the collaborator that knows which test cases make up a run.
//! It hands back fully constructed nodes with their dependencies already
//! wired; the run only mounts and schedules them.

use crate::event::SystemBus;
use crate::node::RunNode;
use std::sync::Arc;

/// Source of a run's test cases
pub trait Profile: Send + Sync {
    /// Build the ordered list of test-case nodes, dependencies wired.
    ///
    /// Called once per test run; nodes must be fresh (a node's lifecycle
    /// belongs to exactly one run at a time).
    fn test_case_list(&self, bus: &SystemBus) -> Vec<Arc<RunNode>>;
}
