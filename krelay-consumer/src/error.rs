//! Consumer error types.

use krelay_core::BrokerError;
use std::time::Duration;
use thiserror::Error;

/// An option-function rejected its input, or the resolved options are invalid.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OptionError {
    /// A single option received a value it cannot accept
    #[error("invalid consumer option {option}: {reason}")]
    Invalid {
        /// Option name
        option: &'static str,
        /// What was wrong with the value
        reason: String,
    },

    /// The folded option set failed validation
    #[error("consumer options failed validation: {0}")]
    Validation(String),
}

impl From<validator::ValidationErrors> for OptionError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Failure of one read, handle or complete step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// Loose-mode read failed after exhausting reconnect attempts
    #[error("error reader.ReadMessage: {0}")]
    Read(#[source] BrokerError),

    /// Strict-mode fetch failed after exhausting reconnect attempts
    #[error("error reader.FetchMessage: {0}")]
    Fetch(#[source] BrokerError),

    /// Strict-mode commit failed after exhausting reconnect attempts
    #[error("error reader.CommitMessages: {0}")]
    Commit(#[source] BrokerError),

    /// The handler failed for good
    #[error("handler failed after {attempts} attempt(s): {message}")]
    Handler {
        /// Handler calls made
        attempts: u32,
        /// Last handler error
        message: String,
    },

    /// Handling did not finish inside the processing timeout
    #[error("message processing exceeded {0:?}")]
    ProcessingTimeout(Duration),

    /// The consumer was cancelled while waiting
    #[error("consumer cancelled")]
    Cancelled,
}

impl ConsumerError {
    /// Whether the error is the consumer's own cancellation rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Result type alias for consumer steps.
pub type Result<T> = std::result::Result<T, ConsumerError>;
