//! Error types for the krelay core library.

use thiserror::Error;

/// Errors raised by the broker collaborators (dial, reader, writer, admin).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The stream was closed cleanly (EOF-class). Never retried.
    #[error("stream closed")]
    Closed,

    /// Transport level failure, eligible for retry.
    #[error("network error: {message}")]
    Network { message: String },

    /// The broker refused to create a topic that already exists.
    #[error("topic already exists: {topic}")]
    TopicAlreadyExists { topic: String },

    /// The broker rejected the request.
    #[error("broker rejected request: {message}")]
    Rejected { message: String },
}

impl BrokerError {
    /// Shorthand for a [`BrokerError::Network`].
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Whether this error means the underlying stream is gone for good.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Result type alias for broker collaborator calls.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;

/// Main error type for krelay core operations.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Configuration could not be loaded or failed validation
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Trace or span identifiers could not be decoded
    #[error("Invalid trace context: {message}")]
    InvalidTraceContext { message: String },

    /// Collaborator failure surfaced through a core API
    #[error(transparent)]
    Broker(#[from] BrokerError),
}

/// Result type alias for krelay core operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<validator::ValidationErrors> for Error {
    fn from(err: validator::ValidationErrors) -> Self {
        Error::Configuration {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Configuration {
            message: err.to_string(),
        }
    }
}
