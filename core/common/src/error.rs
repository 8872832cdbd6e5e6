//! Common error types for StepSync.

use thiserror::Error;

/// Top-level error type for StepSync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local persistence failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Transport-level failure, or a success response that could not be parsed.
    #[error("Network error: {0}")]
    Network(String),

    /// The remote call did not complete in time.
    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The server answered with a status worth retrying (5xx, 408, 429).
    #[error("Server error {status}: {body}")]
    Server { status: u16, body: String },

    /// The server refused the request; retrying will not help.
    #[error("Rejected by server ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A withdrawal asked for more than the local balance holds.
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance { requested: u64, available: u64 },

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Another open store already owns this state path.
    #[error("State at {0} is in use by another process")]
    Locked(String),

    /// The flush scheduler is gone or stopped answering.
    #[error("Scheduler error: {0}")]
    Scheduler(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
