//! Publisher error types.

use krelay_core::BrokerError;
use thiserror::Error;

/// Publish failures. Always returned to the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// Rejected before any network interaction
    #[error("topic must not be empty")]
    EmptyTopic,

    /// The writer for a topic could not be built
    #[error("failed to create writer for {topic}: {source}")]
    Writer {
        /// Physical topic
        topic: String,
        /// Collaborator error
        #[source]
        source: BrokerError,
    },

    /// The writer failed to send
    #[error("failed to publish to {topic}: {source}")]
    Write {
        /// Physical topic
        topic: String,
        /// Collaborator error
        #[source]
        source: BrokerError,
    },

    /// Publishing after the writers were closed
    #[error("publisher is closed")]
    Closed,
}

/// Result type alias for publish operations.
pub type Result<T> = std::result::Result<T, PublishError>;
