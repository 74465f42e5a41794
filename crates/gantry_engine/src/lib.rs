//! GANTRY Engine
//!
//! The test-run domain: the dependency DAG of schedulable nodes, test-case
//! execution with declared parameter injection, per-case data models and
//! their observer snapshots, the session/panel/test-run hierarchy, and the
//! request/response rendezvous for user prompts. All state changes surface as
//! [`SystemEvent`]s on the shared bus.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod data_model;
pub mod event;
pub mod interaction;
pub mod node;
pub mod parameter;
pub mod profile;
pub mod run;
pub mod session;

pub use data_model::{
    ExecutionSnapshot, RunBinding, TestCaseDataModel, TestCaseSnapshot, TestExecution,
};
pub use event::{
    EventKind, ExecutionStarted, ParameterRecorded, SystemBus, SystemEvent, TestCaseFailed,
    TestRunFinished, UserResponse,
};
pub use interaction::{InteractionContext, InteractionKind};
pub use node::{
    ExecutionFailure, NodeKind, ParamSource, ParamSpec, RunNode, TestCaseArgs, TestCaseBody,
    TestCaseBuilder, TestCaseResult,
};
pub use parameter::{Parameter, ParameterSnapshot};
pub use profile::Profile;
pub use run::TestRun;
pub use session::{ControlSession, Panel, ViewSession};
