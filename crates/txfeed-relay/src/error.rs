//! Relay error types.

use thiserror::Error;

/// Relay errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store returned a row that is not a JSON object.
    #[error("unexpected record shape on channel {channel}: expected a JSON object")]
    RecordShape {
        /// Channel the lookup was made for.
        channel: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Error returned by a connection handle when a frame cannot be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    /// The connection has gone away.
    #[error("connection closed")]
    Closed,

    /// The connection's outbound queue is full.
    #[error("outbound queue full")]
    Full,
}

/// Relay result type.
pub type Result<T> = std::result::Result<T, Error>;
