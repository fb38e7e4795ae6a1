//! Error types for the context engine.

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can surface from the engine to a caller.
///
/// Per the propagation policy: most internal failures (summarizer errors,
/// missing/corrupt index, missing archive body) are recovered locally and
/// folded into fallback events or a downgraded selection — they never
/// become an `Error`. Only storage write failures (on an awaited build)
/// and cancellation reach the caller.
#[derive(Debug, Error)]
pub enum Error {
    /// Underlying filesystem error.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to serialize or deserialize an index document or archive body.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A save of the index document failed; the prior index remains the
    /// source of truth.
    #[error("storage write failed for session {session_key}: {source}")]
    StorageWrite {
        /// Session the write was attempted for.
        session_key: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A configuration value fell outside its documented range.
    #[error("invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// The caller cancelled an operation while it was awaiting I/O.
    #[error("operation cancelled")]
    Cancelled,
}
