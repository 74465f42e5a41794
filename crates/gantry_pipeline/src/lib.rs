//! GANTRY Stage Pipeline
//!
//! Three long-lived workers connected by bounded FIFO queues: the executor
//! spawns node executions, the result classifier routes outcomes, and the
//! failure handler retries or quarantines. Backpressure is inherent: a stage
//! that produces faster than its downstream consumes blocks at the bounded
//! send.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classifier;
pub mod executor;
pub mod failure;

pub use classifier::ResultClassifier;
pub use executor::NodeExecutor;
pub use failure::FailureHandler;

use gantry_engine::RunNode;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default capacity of every stage queue
pub const STAGE_QUEUE_CAPACITY: usize = 50;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of the ready, classify, and failure queues
    pub queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: STAGE_QUEUE_CAPACITY,
        }
    }
}

/// The wired stage workers plus the pipeline's input side.
///
/// Feed ready nodes into `ready_tx` (the state manager's `NodeReady` handler
/// does this) and run each worker on its own task with a cancellation token.
/// Dropping `ready_tx` closes the pipeline front to back: each stage drains
/// and exits when its upstream ends. Cancelling the token ends every stage
/// without waiting for the queues.
pub struct Pipeline {
    /// Input: nodes that became ready
    pub ready_tx: mpsc::Sender<Arc<RunNode>>,
    /// Stage 1: executes nodes concurrently
    pub executor: NodeExecutor,
    /// Stage 2: clears passes, forwards failures
    pub classifier: ResultClassifier,
    /// Stage 3: retries or quarantines
    pub failure: FailureHandler,
}

impl Pipeline {
    /// Build the stages and their connecting queues
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        let (ready_tx, ready_rx) = mpsc::channel(config.queue_capacity);
        let (classify_tx, classify_rx) = mpsc::channel(config.queue_capacity);
        let (failure_tx, failure_rx) = mpsc::channel(config.queue_capacity);
        Self {
            ready_tx,
            executor: NodeExecutor::new(ready_rx, classify_tx),
            classifier: ResultClassifier::new(classify_rx, failure_tx),
            failure: FailureHandler::new(failure_rx),
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}
