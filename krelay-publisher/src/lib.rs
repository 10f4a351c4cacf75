//! # Krelay Publisher
//!
//! Publishing half of the krelay management layer.
//!
//! This crate provides:
//! - One cached writer per physical (prefixed) topic
//! - Identity headers on every message
//! - Producer spans and B3 headers on traced publishes
//!
//! ## Examples
//!
//! ```rust
//! use krelay_core::{backends::MemoryBroker, MessageContext, UserInfo};
//! use krelay_publisher::Publisher;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let broker = MemoryBroker::new();
//! let publisher = Publisher::new(Arc::new(broker.clone()), vec!["memory:9092".into()], "dev.");
//!
//! let ctx = MessageContext::new().with_user_info(UserInfo::new("user-1", "orgs/1"));
//! publisher.publish_context(&ctx, "orders", "order-1", "payload").await?;
//! assert_eq!(broker.messages("dev.orders").len(), 1);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod publisher;

pub use error::{PublishError, Result};
pub use publisher::Publisher;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{PublishError, Publisher};
    pub use krelay_core::prelude::*;
}
