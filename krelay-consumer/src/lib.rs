//! # Krelay Consumer
//!
//! Consumer-group workers with a selectable delivery guarantee.
//!
//! This crate provides:
//! - The consumer option builder and its default set
//! - [`StrictConsumer`] (explicit commit, halts on a poison message) and
//!   [`LooseConsumer`] (auto commit, skips failures)
//! - Bounded, cancellable retry for broker calls and handler calls
//! - Processed-message metrics
//!
//! ## Examples
//!
//! ```rust
//! use bytes::Bytes;
//! use krelay_consumer::{options, ConsumerOption, HandlerError, MessageContext};
//!
//! let option = ConsumerOption::resolve(
//!     vec!["localhost:9092".to_string()],
//!     "prod.orders",
//!     "prod.billing.consumer-group.orders",
//!     vec![options::auto_commit(), options::retry_logic_attempts(3)],
//! )
//! .unwrap();
//! assert!(!option.strict_commit);
//!
//! let _handler = |_ctx: MessageContext, payload: Bytes| async move {
//!     if payload.is_empty() {
//!         return Err(HandlerError::permanent("empty payload"));
//!     }
//!     Ok(())
//! };
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod consumer;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod options;
pub mod retry;

pub use consumer::{new_consumer, Consumer, ConsumerBase, HandleOutcome, LooseConsumer, StrictConsumer};
pub use error::{ConsumerError, OptionError, Result};
pub use handler::{HandlerError, HandlerResult, MessageHandler};
pub use krelay_core::MessageContext;
pub use metrics::{ConsumerMetrics, MetricsSnapshot, ProcessStatus};
pub use options::{ConsumerOption, OptionFn};
pub use retry::{RetryError, RetryPolicy};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{
        options, Consumer, ConsumerOption, HandlerError, HandlerResult, MessageHandler, OptionFn,
    };
    pub use krelay_core::prelude::*;
}
