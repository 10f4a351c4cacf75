//! # Prelude
//!
//! Commonly used krelay types and traits in one import.

pub use crate::{
    broker::{Connection, Connector, Reader, Writer},
    config::ManagementConfig,
    context::MessageContext,
    error::{BrokerError, Error, Result},
    identity::UserInfo,
    message::{Header, Message},
    trace::{SpanKind, TraceContext},
    types::{Offset, PartitionId, Timestamp},
};

pub use bytes::Bytes;
