//! Handler contract.

use async_trait::async_trait;
use bytes::Bytes;
use krelay_core::MessageContext;
use std::fmt;
use std::future::Future;

/// Handler failure, classified by the handler itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    retryable: bool,
    message: String,
}

impl HandlerError {
    /// Transient failure: the handler is called again with the same payload.
    pub fn retryable(err: impl fmt::Display) -> Self {
        Self {
            retryable: true,
            message: err.to_string(),
        }
    }

    /// Terminal failure: no further attempts for this message.
    pub fn permanent(err: impl fmt::Display) -> Self {
        Self {
            retryable: false,
            message: err.to_string(),
        }
    }

    /// Whether another attempt may succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Error text
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

/// Result of one handler call.
pub type HandlerResult = std::result::Result<(), HandlerError>;

/// Business logic invoked once per attempt with the raw payload.
///
/// Implemented for any `Fn(MessageContext, Bytes) -> impl Future<Output = HandlerResult>`.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one payload.
    async fn handle(&self, ctx: &MessageContext, payload: Bytes) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(MessageContext, Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, ctx: &MessageContext, payload: Bytes) -> HandlerResult {
        (self)(ctx.clone(), payload).await
    }
}
