//! Error types for the shuffle layer.

use std::io;

use thiserror::Error;

/// Result type alias for shuffle operations
pub type Result<T> = std::result::Result<T, ShuffleError>;

/// Error type for shuffle operations
///
/// Nothing in this crate retries on error; every variant propagates straight to the
/// caller of the operation that detected it.
#[derive(Error, Debug)]
pub enum ShuffleError {
    /// A precondition on an argument was violated
    #[error("Invalid argument '{argument}': {reason}")]
    InvalidArgument {
        /// The argument name
        argument: &'static str,
        /// Explanation of why it's invalid
        reason: String,
    },

    /// An operation was called in a state that does not allow it
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The byte stream does not follow the expected format
    #[error("Format error: {0}")]
    Format(String),

    /// An attached input failed while the merge reader was pulling records from it
    #[error("Input '{source_name}' failed: {source}")]
    Upstream {
        /// Name of the input that failed
        source_name: String,
        /// The underlying failure
        source: Box<ShuffleError>,
    },

    /// An object was used after it was disposed
    #[error("{0} was used after it was disposed")]
    Disposed(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ShuffleError {
    pub fn invalid_argument(argument: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            argument,
            reason: reason.into(),
        }
    }

    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format(msg.into())
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    /// Wrap an error raised by an upstream input with the input's name.
    pub fn upstream(source_name: impl Into<String>, source: ShuffleError) -> Self {
        Self::Upstream {
            source_name: source_name.into(),
            source: Box::new(source),
        }
    }

    /// Whether this error (or the upstream failure it wraps) is a format error.
    pub fn is_format(&self) -> bool {
        match self {
            Self::Format(_) => true,
            Self::Upstream { source, .. } => source.is_format(),
            _ => false,
        }
    }

    /// Map an unexpected end of stream to a format error; other I/O errors pass through.
    pub(crate) fn from_read(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Format(format!("stream ended in the middle of {what}"))
        } else {
            Self::Io(err)
        }
    }
}
