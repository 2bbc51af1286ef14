//! Error types for pushrpc.

use thiserror::Error;

/// Main error type for all pushrpc operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the push channel or transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (oversize frame, malformed message, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A POST referenced a client id with no live connection.
    #[error("Not Connected")]
    NotConnected,

    /// The reverse channel closed before the operation completed.
    #[error("Channel closed")]
    ChannelClosed,

    /// The remote method reported an error (`methodError` on the wire).
    #[error("Remote error: {0}")]
    Remote(String),

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
