//! GANTRY Server
//!
//! The composition root: builds the bus, the bounded channels, the stage
//! pipeline, the state manager, and every worker, and supervises them for
//! the life of the process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod app;
pub mod sample_profile;

pub use app::{AppConfig, Application};
pub use sample_profile::SampleProfile;
