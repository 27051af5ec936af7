use thiserror::Error;

/// Error kinds surfaced by the planner, the resource tree and the scheduling
/// service. The first six variants carry the failure classes the planner and
/// tree APIs report; the remaining ones wrap boundary failures (file IO,
/// JSON parsing, external stores).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An internal invariant would be violated. Seeing this error is a bug in
    /// the caller or in this crate, never a recoverable runtime condition.
    #[error("Internal conflict: {0}")]
    Conflict(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON input: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("External store failure: {0}")]
    StoreError(String),
}

impl Error {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    pub fn out_of_range(msg: impl Into<String>) -> Self {
        Error::OutOfRange(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
