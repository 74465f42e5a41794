//! Core error types for GANTRY.

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Core error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    /// Adding a dependency edge would close a cycle
    #[error("cyclic dependency: {from} cannot depend on {to}")]
    CyclicDependency {
        /// Node the edge starts from
        from: String,
        /// Node the edge points to
        to: String,
    },

    /// Entity lookup failed
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Entity already present where at most one is allowed
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Entity kind
        kind: String,
        /// Entity id
        id: String,
    },

    /// Validation error
    #[error("validation failed for {field}: {reason}")]
    Validation {
        /// Field that failed validation
        field: String,
        /// Why it failed
        reason: String,
    },

    /// Capacity exceeded
    #[error("capacity exceeded for {resource}: {limit}")]
    CapacityExceeded {
        /// Resource that hit its limit
        resource: String,
        /// The limit
        limit: u64,
    },

    /// A stage or output queue was closed while sending
    #[error("channel closed: {channel}")]
    ChannelClosed {
        /// Name of the closed channel
        channel: String,
    },

    /// A command required a control session but none exists
    #[error("no control session established")]
    NoControlSession,

    /// Internal error (for unexpected states)
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::NoControlSession;
        assert_eq!(format!("{}", err), "no control session established");

        let err = CoreError::NotFound {
            kind: "TestCase".to_string(),
            id: "tc_123".to_string(),
        };
        assert_eq!(format!("{}", err), "TestCase not found: tc_123");
    }

    #[test]
    fn test_cyclic_dependency_error() {
        let err = CoreError::CyclicDependency {
            from: "a".to_string(),
            to: "b".to_string(),
        };
        let s = format!("{}", err);
        assert!(s.contains("cyclic"));
        assert!(s.contains('a'));
        assert!(s.contains('b'));
    }

    #[test]
    fn test_error_equality() {
        assert_eq!(CoreError::NoControlSession, CoreError::NoControlSession);
        assert_ne!(
            CoreError::NoControlSession,
            CoreError::ChannelClosed {
                channel: "ready".to_string()
            }
        );
    }
}
