//! Request-scoped context carried across publish and consume.

use crate::carrier::TraceCarrier;
use crate::identity::UserInfo;
use crate::message::{Header, Message};
use crate::trace::{B3Propagator, TraceContext};
use crate::types::{Offset, PartitionId, Timestamp};
use bytes::Bytes;

/// Where a consumed message came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub topic: String,
    pub partition: PartitionId,
    pub offset: Offset,
    pub key: Bytes,
    pub timestamp: Timestamp,
}

/// Identity, optional trace and (on consume) delivery metadata.
///
/// Publishers read identity and trace from it; consumers rebuild it from the
/// headers of every message before calling the handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageContext {
    user_info: UserInfo,
    trace: Option<TraceContext>,
    delivery: Option<Delivery>,
}

impl MessageContext {
    /// Empty context: no identity, no trace.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an identity.
    #[must_use]
    pub fn with_user_info(mut self, user_info: UserInfo) -> Self {
        self.user_info = user_info;
        self
    }

    /// Attach an active trace.
    #[must_use]
    pub fn with_trace(mut self, trace: TraceContext) -> Self {
        self.trace = Some(trace);
        self
    }

    /// Attach delivery metadata.
    #[must_use]
    pub fn with_delivery(mut self, delivery: Delivery) -> Self {
        self.delivery = Some(delivery);
        self
    }

    /// Identity of the request
    #[must_use]
    pub const fn user_info(&self) -> &UserInfo {
        &self.user_info
    }

    /// Active trace, if any
    #[must_use]
    pub const fn trace(&self) -> Option<&TraceContext> {
        self.trace.as_ref()
    }

    /// Delivery metadata (consume side only)
    #[must_use]
    pub const fn delivery(&self) -> Option<&Delivery> {
        self.delivery.as_ref()
    }

    /// Rebuild the context of a consumed message.
    ///
    /// Identity always comes back. The trace is the remote parent extracted
    /// from the propagation headers, or `None` when the message carries none.
    #[must_use]
    pub fn from_message(message: &Message) -> (Self, Option<TraceContext>) {
        let carrier = TraceCarrier::from_message(message);
        let remote = if carrier.get_all_values().is_some() {
            B3Propagator::new().extract(&carrier)
        } else {
            None
        };

        let ctx = Self::new()
            .with_user_info(UserInfo::from_message(message))
            .with_delivery(Delivery {
                topic: message.topic.clone(),
                partition: message.partition,
                offset: message.offset,
                key: message.key.clone(),
                timestamp: message.timestamp,
            });
        (ctx, remote)
    }

    /// Identity headers, plus trace headers for `trace`.
    #[must_use]
    pub fn outbound_headers(&self, trace: Option<&TraceContext>) -> Vec<Header> {
        let mut headers = self.user_info.to_headers();
        if let Some(trace) = trace {
            let mut carrier = TraceCarrier::new();
            B3Propagator::new().inject(trace, &mut carrier);
            headers.extend(carrier.get_all_values().unwrap_or_default());
        }
        headers
    }
}
