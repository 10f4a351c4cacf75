//! # Krelay Core
//!
//! Core types for the krelay Kafka management layer: messages and headers,
//! identity and B3 trace propagation, the broker collaborator traits and
//! configuration.
//!
//! ## Quick Start
//!
//! ```rust
//! use krelay_core::{Message, MessageContext, TraceContext, UserInfo};
//!
//! let ctx = MessageContext::new().with_user_info(UserInfo::new("user-1", "orgs/1"));
//! let trace = TraceContext::new_root();
//! let message = Message::new("orders", "order-1", "payload")
//!     .with_headers(ctx.outbound_headers(Some(&trace)));
//!
//! let (restored, remote) = MessageContext::from_message(&message);
//! assert_eq!(restored.user_info().user_id, "user-1");
//! assert_eq!(remote, Some(trace));
//! ```
//!
//! ## Architecture
//!
//! - [`message`]: broker records and headers
//! - [`identity`] and [`carrier`]: the two header families carried on every message
//! - [`trace`]: trace/span identifiers, the B3 propagator and spans
//! - [`context`]: request context rebuilt on consume and flattened on publish
//! - [`broker`]: collaborator traits implemented by [`backends`]
//! - [`config`]: configuration loading and validation

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod backends;
pub mod broker;
pub mod carrier;
pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod message;
pub mod prelude;
pub mod trace;
pub mod types;

pub use crate::{
    broker::{
        CommitMode, Connection, Connector, Reader, ReaderConfig, TopicConfig, Writer,
        WriterConfig,
    },
    carrier::TraceCarrier,
    config::{ConfigLoader, ManagementConfig},
    context::{Delivery, MessageContext},
    error::{BrokerError, BrokerResult, Error, Result},
    identity::UserInfo,
    message::{Header, Message},
    trace::{B3Propagator, Span, SpanId, SpanKind, TraceContext, TraceId},
    types::{consumer_group_name, topic_with_prefix, Offset, PartitionId, Timestamp},
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
