//! Error types for multipart encoding
//!
//! Validation errors are returned synchronously from `append`; every other
//! variant travels through the output stream as its single terminal item.

/// Raised by `MultipartEncoder::append` before anything is staged
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Field name was empty, zero or not a string/number
    #[error("Field must be specified and must be a string or a number")]
    InvalidField,
    /// Value was the missing-value sentinel
    #[error("Value can't be missing")]
    MissingValue,
}

/// Main error type for multipart operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MultipartError {
    /// Invalid `append` arguments
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// I/O related errors (file sources)
    #[error("IO error: {0}")]
    IO(String),
    /// A queued source failed
    #[error("Source error: {0}")]
    Source(String),
    /// Operation was cancelled
    #[error("Operation cancelled")]
    Cancelled,
    /// `append` was called after the body started streaming
    #[error("Cannot append after the multipart body has started streaming")]
    AlreadyStarted,
    /// `buffer` was called on a body that was already read
    #[error("The multipart body has already been consumed")]
    Consumed,
}

impl MultipartError {
    /// Convenience constructor for failures of user supplied sources
    pub fn failed<E: std::fmt::Display>(err: E) -> Self {
        MultipartError::Source(err.to_string())
    }
}

impl From<std::io::Error> for MultipartError {
    fn from(err: std::io::Error) -> Self {
        MultipartError::IO(err.to_string())
    }
}

/// Result type for multipart operations
pub type MultipartResult<T> = Result<T, MultipartError>;
