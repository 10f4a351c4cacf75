//! # Krelay Management
//!
//! The Kafka management facade: per-topic writers, consumer groups with
//! strict or loose delivery, one supervising task per consumer and an
//! orderly shutdown.
//!
//! This crate provides:
//! - [`KafkaManagement`]: publish, traced publish, topic upsert, consume and close
//! - Liveness probing of the admin connection with transparent reconnect
//! - Processed-message metrics across all consumers
//!
//! ## Examples
//!
//! ```rust
//! use bytes::Bytes;
//! use krelay_core::{backends::MemoryBroker, ManagementConfig, MessageContext};
//! use krelay_management::{options, HandlerError, KafkaManagement};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ManagementConfig::new(["memory:9092"])
//!     .with_topic_prefix("dev.")
//!     .with_service_name("billing");
//! let kafka = KafkaManagement::new(config, Arc::new(MemoryBroker::new()))?;
//! kafka.connect_to_kafka().await;
//!
//! let group = kafka.consumer_group_name("orders");
//! kafka.consume("orders", &group, vec![options::auto_commit()], |_ctx: MessageContext, payload: Bytes| async move {
//!     println!("received {} bytes", payload.len());
//!     Ok::<(), HandlerError>(())
//! })?;
//!
//! kafka.publish_context(&MessageContext::new(), "orders", "order-1", "payload").await?;
//! kafka.close().await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod connection;
pub mod error;
pub mod management;
mod registry;
mod supervisor;

pub use error::{ManagementError, Result};
pub use krelay_consumer::{options, HandlerError, HandlerResult, MessageHandler, MetricsSnapshot, ProcessStatus};
pub use management::KafkaManagement;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::{options, HandlerError, HandlerResult, KafkaManagement, ManagementError, MessageHandler};
    pub use krelay_core::prelude::*;
}
