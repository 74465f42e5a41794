//! GANTRY Application State
//!
//! The process-wide mutable state and its keeper: the state manager holds
//! the single control session, the session map, and the outstanding
//! interactions, and fans domain events out to the transport-facing output
//! channels. The command dispatcher maps inbound command messages to domain
//! actions.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod forward;
pub mod manager;
pub mod message;
pub mod transport;
pub mod ui;

pub use command::{CommandDispatcher, CommandMessage};
pub use forward::{TcDataBroadcaster, UiRequestForwarder};
pub use manager::{SessionRole, StateConfig, StateManager, StateOutputs};
pub use message::{PromptMessage, PromptPayload, TcDataKind, TcDataMessage};
pub use transport::{RecordingTransport, Transport};
pub use ui::{UiResponseMessage, UiResponseWorker};
