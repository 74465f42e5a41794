//! GANTRY Event Bus
//!
//! Process-internal publish/subscribe over a closed set of event kinds.
//! The bus performs no transport fan-out; it only decouples domain state
//! changes from the components that react to them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bus;

pub use bus::{BusEvent, EventBus, SubscriptionId};
