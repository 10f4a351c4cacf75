//! Message envelope exchanged with the broker collaborators.

use crate::types::{Offset, PartitionId, Timestamp};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A single message header. Keys and values are plain strings on this boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Header name
    pub key: String,
    /// Header value
    pub value: String,
}

impl Header {
    /// Create a new header.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Broker message envelope.
///
/// The same type is handed to writers on publish and returned by readers on
/// consume; `partition` and `offset` are only meaningful on the consume side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Physical (prefixed) topic name
    pub topic: String,

    /// Partition the message was read from
    pub partition: PartitionId,

    /// Offset of the message inside its partition
    pub offset: Offset,

    /// Message key
    pub key: Bytes,

    /// Caller-serialized payload
    pub value: Bytes,

    /// Identity and trace propagation headers
    pub headers: Vec<Header>,

    /// Broker (or producer) timestamp
    pub timestamp: Timestamp,
}

impl Message {
    /// Create an outbound message for the given physical topic.
    pub fn new(topic: impl Into<String>, key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            partition: PartitionId::default(),
            offset: Offset::default(),
            key: key.into(),
            value: value.into(),
            headers: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Set the partition.
    #[must_use]
    pub const fn with_partition(mut self, partition: PartitionId) -> Self {
        self.partition = partition;
        self
    }

    /// Set the offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: Offset) -> Self {
        self.offset = offset;
        self
    }

    /// Replace all headers.
    #[must_use]
    pub fn with_headers(mut self, headers: Vec<Header>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Get the first header value for `key`.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.key == key)
            .map(|h| h.value.as_str())
    }

    /// Add or replace a header.
    pub fn set_header(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.headers.iter_mut().find(|h| h.key == key) {
            Some(existing) => existing.value = value,
            None => self.headers.push(Header { key, value }),
        }
    }

    /// Key rendered for log fields.
    #[must_use]
    pub fn key_lossy(&self) -> String {
        String::from_utf8_lossy(&self.key).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_header_replaces_existing() {
        let mut msg = Message::new("t", "k", "v");
        msg.set_header("a", "1");
        msg.set_header("a", "2");
        msg.set_header("b", "3");

        assert_eq!(msg.headers.len(), 2);
        assert_eq!(msg.header("a"), Some("2"));
        assert_eq!(msg.header("b"), Some("3"));
        assert_eq!(msg.header("c"), None);
    }

    #[test]
    fn test_builder_methods() {
        let msg = Message::new("t", "key", "value")
            .with_partition(PartitionId::new(3))
            .with_offset(Offset::new(7));

        assert_eq!(msg.partition.value(), 3);
        assert_eq!(msg.offset.value(), 7);
        assert_eq!(msg.key_lossy(), "key");
        assert_eq!(&msg.value[..], b"value");
    }
}
