//! Error types for Coherence client operations.

use std::io;
use thiserror::Error;

/// Outcome disposition attached to a cancelled operation.
///
/// When an operation is cancelled before a response arrives, the client
/// reports whether the request is known to have never reached the server
/// or whether its remote outcome is unknowable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// The request never reached the wire; the operation was confirmed
    /// not applied.
    NotApplied,
    /// The request may have reached the server; completion is unknown.
    Unknown,
}

impl std::fmt::Display for Disposition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Disposition::NotApplied => write!(f, "not applied"),
            Disposition::Unknown => write!(f, "completion unknown"),
        }
    }
}

/// The main error type for Coherence client operations.
#[derive(Debug, Error)]
pub enum CoherenceError {
    /// Connection-related errors (network failures, disconnections).
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol-related errors (unexpected responses, malformed frames).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A cache was requested with key/value types inconsistent with the
    /// handle already registered under the same name.
    #[error("type mismatch for cache '{name}': registered as {expected}, requested as {actual}")]
    TypeMismatch {
        /// Name of the cache the request was for.
        name: String,
        /// Type pair the existing handle was registered with.
        expected: String,
        /// Type pair the caller requested.
        actual: String,
    },

    /// A payload could not be converted to the declared type. Scoped to the
    /// single call or item that failed.
    #[error("decode error: {0}")]
    Decode(String),

    /// The server reported an operational fault; the diagnostic message is
    /// preserved verbatim.
    #[error("remote fault: {0}")]
    Remote(String),

    /// The operation was cancelled before completion.
    #[error("operation cancelled ({disposition})")]
    Cancelled {
        /// Whether the request was confirmed unsent or its outcome is unknown.
        disposition: Disposition,
    },

    /// The cache was destroyed; every subsequent operation on the handle
    /// fails with this kind.
    #[error("cache '{0}' has been destroyed")]
    CacheDestroyed(String),

    /// The local handle was released; the remote cache still exists but this
    /// handle can no longer be used.
    #[error("cache '{0}' has been released")]
    CacheReleased(String),

    /// The owning session was closed.
    #[error("session is closed")]
    SessionClosed,

    /// Configuration errors (invalid settings).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CoherenceError {
    /// Returns `true` if this error is terminal: the resource it refers to
    /// is gone and retrying can never succeed.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CoherenceError::CacheDestroyed(_)
                | CoherenceError::CacheReleased(_)
                | CoherenceError::SessionClosed
        )
    }
}

/// A specialized `Result` type for Coherence client operations.
pub type Result<T> = std::result::Result<T, CoherenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = CoherenceError::Connection("endpoint unreachable".to_string());
        assert_eq!(err.to_string(), "connection error: endpoint unreachable");
    }

    #[test]
    fn test_type_mismatch_display() {
        let err = CoherenceError::TypeMismatch {
            name: "people".to_string(),
            expected: "<i64, Person>".to_string(),
            actual: "<i64, String>".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for cache 'people': registered as <i64, Person>, requested as <i64, String>"
        );
    }

    #[test]
    fn test_cancelled_display_distinguishes_disposition() {
        let unknown = CoherenceError::Cancelled {
            disposition: Disposition::Unknown,
        };
        let not_applied = CoherenceError::Cancelled {
            disposition: Disposition::NotApplied,
        };
        assert_eq!(unknown.to_string(), "operation cancelled (completion unknown)");
        assert_eq!(not_applied.to_string(), "operation cancelled (not applied)");
    }

    #[test]
    fn test_terminal_kinds() {
        assert!(CoherenceError::CacheDestroyed("c".to_string()).is_terminal());
        assert!(CoherenceError::CacheReleased("c".to_string()).is_terminal());
        assert!(CoherenceError::SessionClosed.is_terminal());
        assert!(!CoherenceError::Connection("lost".to_string()).is_terminal());
        assert!(!CoherenceError::Remote("oops".to_string()).is_terminal());
    }

    #[test]
    fn test_remote_fault_preserves_message() {
        let err = CoherenceError::Remote("processor threw IllegalStateException".to_string());
        assert!(err.to_string().contains("IllegalStateException"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused");
        let err: CoherenceError = io_err.into();
        assert!(matches!(err, CoherenceError::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<CoherenceError>();
    }
}
