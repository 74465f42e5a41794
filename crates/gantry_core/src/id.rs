//! Unique identifiers for GANTRY entities.
//!
//! All UUID-backed ids serialize as 32-character lowercase hex (UUID simple
//! format), which is the wire representation observers and commands use.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! hex_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "uuid::serde::simple")] Uuid);

        impl $name {
            /// Create a new random id
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Create from UUID bytes
            #[must_use]
            pub const fn from_bytes(bytes: [u8; 16]) -> Self {
                Self(Uuid::from_bytes(bytes))
            }

            /// Parse from the 32-character hex wire form
            ///
            /// # Errors
            ///
            /// Returns [`crate::CoreError::Validation`] if the input is not a
            /// valid UUID in simple or hyphenated form.
            pub fn parse(input: &str) -> crate::CoreResult<Self> {
                Uuid::parse_str(input).map(Self).map_err(|_| {
                    crate::CoreError::Validation {
                        field: "id".to_string(),
                        reason: format!("not a valid id: {input:?}"),
                    }
                })
            }

            /// Get the 32-character hex wire form
            #[must_use]
            pub fn as_hex(&self) -> String {
                self.0.simple().to_string()
            }

            /// Get as UUID
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0.simple())
            }
        }
    };
}

hex_id!(
    /// Node identifier - identifies one schedulable node (test case or terminal)
    NodeId,
    "node_"
);

hex_id!(
    /// Test run identifier - identifies one execution of a profile on a panel
    TestRunId,
    "run_"
);

hex_id!(
    /// Session identifier - identifies a control or view session
    SessionId,
    "session_"
);

hex_id!(
    /// Interaction identifier - correlates a user prompt with its response
    InteractionId,
    "interaction_"
);

hex_id!(
    /// Client identifier - opaque transport connection handle keying sessions
    ClientId,
    "client_"
);

/// Panel identifier - position of one hardware fixture within a control session
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct PanelId(u32);

impl PanelId {
    /// Create a panel id from its position number
    #[must_use]
    pub const fn new(position: u32) -> Self {
        Self(position)
    }

    /// Get the position number
    #[must_use]
    pub const fn position(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for PanelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "panel_{}", self.0)
    }
}
