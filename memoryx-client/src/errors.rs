//! Error types for the MemoryX client outbox and flusher.

use thiserror::Error;

/// Main error type for the MemoryX client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The embedded outbox database could not be opened or queried.
    #[error("outbox database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The outbox file path could not be resolved or created.
    #[error("outbox storage error: {0}")]
    Storage(String),

    /// A flush request failed at the transport layer (connection refused,
    /// DNS failure, timeout before any response was received).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The server responded with a non-2xx status.
    #[error("server rejected request with status {status}: {body}")]
    ServerRejected {
        /// HTTP status code returned by the server.
        status: u16,
        /// Response body, truncated for diagnostics.
        body: String,
    },

    /// JSON encode/decode error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation requested on an item that no longer exists in the outbox
    /// (already flushed, already dead-lettered, or never enqueued).
    #[error("item not found: {0}")]
    ItemNotFound(i64),

    /// Invalid client configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
