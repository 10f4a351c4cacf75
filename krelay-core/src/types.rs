//! Common types and naming helpers used throughout krelay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type for broker message times.
pub type Timestamp = DateTime<Utc>;

/// Partition identifier inside a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct PartitionId(pub i32);

impl PartitionId {
    /// Create a new partition ID.
    #[must_use]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the raw partition ID value.
    #[must_use]
    pub const fn value(self) -> i32 {
        self.0
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for PartitionId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// Message offset within a partition.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Offset(pub i64);

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Offset {
    fn from(offset: i64) -> Self {
        Self(offset)
    }
}

impl Offset {
    /// Create a new offset.
    #[must_use]
    pub const fn new(offset: i64) -> Self {
        Self(offset)
    }

    /// Get the next offset, which is what gets committed after this one is handled.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw offset value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }
}

/// Physical topic name: the configured prefix followed by the logical name.
///
/// No normalization happens here. Publish and consume both go through this
/// function so both sides always agree on the wire name.
///
/// ```
/// assert_eq!(krelay_core::topic_with_prefix("orders", "prod.tokyo."), "prod.tokyo.orders");
/// ```
#[must_use]
pub fn topic_with_prefix(topic: &str, prefix: &str) -> String {
    let mut name = String::with_capacity(prefix.len() + topic.len());
    name.push_str(prefix);
    name.push_str(topic);
    name
}

/// Recommended consumer-group name: `<prefix><service>.consumer-group.<topic>`.
#[must_use]
pub fn consumer_group_name(prefix: &str, service: &str, topic: &str) -> String {
    format!("{prefix}{service}.consumer-group.{topic}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_topic_with_prefix() {
        assert_eq!(topic_with_prefix("orders", "prod.tokyo."), "prod.tokyo.orders");
        assert_eq!(topic_with_prefix("orders", ""), "orders");
    }

    #[test]
    fn test_consumer_group_name() {
        assert_eq!(
            consumer_group_name("prod.", "billing", "orders"),
            "prod.billing.consumer-group.orders"
        );
    }

    #[test]
    fn test_offset_next() {
        assert_eq!(Offset::new(41).next(), Offset::new(42));
    }

    proptest! {
        #[test]
        fn prefix_is_plain_concatenation(topic in "[a-zA-Z0-9._-]{1,40}", prefix in "[a-zA-Z0-9._-]{1,20}") {
            let name = topic_with_prefix(&topic, &prefix);
            prop_assert_eq!(name.clone(), format!("{prefix}{topic}"));
            prop_assert!(name.starts_with(&prefix));
            prop_assert!(name.ends_with(&topic));
        }
    }
}
