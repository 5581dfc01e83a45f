//! Domain error types
//!
//! Errors the engine core originates. Transient filesystem failures are not
//! represented here: they are handled in place by re-queueing the observation
//! on the retry queue, and stat hard-failures are absorbed into the
//! not-seen / delete-missing protocol.

use thiserror::Error;

/// Errors that can occur in engine operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The configured sync root resolved to a regular file
    #[error("sync root is a file: {0}")]
    RootIsFile(String),

    /// A path observation was malformed or outside the sync root
    #[error("invalid path: {0}")]
    InvalidPath(String),

    /// The state cache flush could not reach a fixpoint; some nodes
    /// remain unpersisted until the next flush
    #[error("state cache flush incomplete: {pending} nodes not persisted")]
    CachePartial {
        /// Number of nodes left in the insert queue
        pending: usize,
    },

    /// Debris bucket allocation failed; the caller must surface this
    #[error("local debris exhausted for {0}")]
    DebrisExhausted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::RootIsFile("/r".to_string());
        assert_eq!(err.to_string(), "sync root is a file: /r");

        let err = EngineError::CachePartial { pending: 3 };
        assert_eq!(
            err.to_string(),
            "state cache flush incomplete: 3 nodes not persisted"
        );
    }

    #[test]
    fn test_error_equality() {
        let a = EngineError::InvalidPath("/x".to_string());
        let b = EngineError::InvalidPath("/x".to_string());
        let c = EngineError::InvalidPath("/y".to_string());
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
