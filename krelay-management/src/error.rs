//! Management facade error types.

use krelay_consumer::OptionError;
use krelay_core::BrokerError;
use krelay_publisher::PublishError;
use thiserror::Error;

/// Errors returned by [`crate::KafkaManagement`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManagementError {
    /// Construction-time configuration problem; fix the config and retry
    #[error("bootstrap error: {message}")]
    Bootstrap {
        /// What is missing or invalid
        message: String,
    },

    /// Empty topic passed to consume or upsert
    #[error("topic must not be empty")]
    EmptyTopic,

    /// Empty consumer group passed to consume
    #[error("consumer group id must not be empty")]
    EmptyGroupId,

    /// An option-function rejected its input
    #[error(transparent)]
    Option(#[from] OptionError),

    /// No broker address could be dialed
    #[error("failed to dial {address}: {source}")]
    Connect {
        /// Last address tried
        address: String,
        /// Dial failure
        #[source]
        source: BrokerError,
    },

    /// Collaborator failure
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// Publish failure
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// `consume` was called outside a tokio runtime
    #[error("consume requires a running tokio runtime")]
    NoRuntime,

    /// The facade was closed
    #[error("kafka management is closed")]
    Closed,
}

impl From<krelay_core::Error> for ManagementError {
    fn from(err: krelay_core::Error) -> Self {
        match err {
            krelay_core::Error::Broker(source) => Self::Broker(source),
            other => Self::Bootstrap {
                message: other.to_string(),
            },
        }
    }
}

/// Result type alias for facade operations.
pub type Result<T> = std::result::Result<T, ManagementError>;
