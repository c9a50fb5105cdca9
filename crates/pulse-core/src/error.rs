//! Error types for the conversion worker.

use thiserror::Error;

/// Result type alias using the worker's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type shared by every adapter and the lifecycle engine.
#[derive(Error, Debug)]
pub enum Error {
    /// Queue store unreachable or command rejected.
    #[error("Queue error: {0}")]
    Queue(String),

    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Object storage transfer failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Conversion service rejected the document or was unreachable
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// A queue entry could not be parsed into a job
    #[error("Decode error: {0}")]
    Decode(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// An operation ran past its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error comes from a transport to shared infrastructure
    /// (queue or status store) rather than from the job itself.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Queue(_) | Error::Database(_) | Error::Timeout(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}
