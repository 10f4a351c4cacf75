//! Configuration schema for the management facade
//!
//! Serialized with serde and checked with `validator` before anything
//! touches the broker.

use crate::types::{consumer_group_name, topic_with_prefix};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::{Validate, ValidationError};

/// Process-wide broker settings.
///
/// The topic prefix is applied to every topic crossing the facade, on
/// publish and on consume alike; it is not negotiable per call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ManagementConfig {
    /// Bootstrap broker addresses (`host:port`)
    #[validate(length(min = 1), custom(function = "validate_brokers"))]
    pub brokers: Vec<String>,

    /// Environment/cluster scoped prefix, e.g. `prod.tokyo.`
    pub topic_prefix: String,

    /// Service name used for recommended consumer-group names
    pub service_name: String,

    /// Local/dev environment: topics are created with replication factor 1
    pub is_local: bool,

    /// Upper bound for one dial attempt in milliseconds
    #[serde(with = "duration_ms")]
    pub dial_timeout: Duration,
}

fn validate_brokers(brokers: &[String]) -> Result<(), ValidationError> {
    if brokers.iter().any(|b| b.trim().is_empty()) {
        return Err(ValidationError::new("empty_broker_address"));
    }
    Ok(())
}

impl ManagementConfig {
    /// Config for the given brokers, everything else default.
    pub fn new<I, S>(brokers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            brokers: brokers.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the topic prefix.
    #[must_use]
    pub fn with_topic_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.topic_prefix = prefix.into();
        self
    }

    /// Set the service name.
    #[must_use]
    pub fn with_service_name(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }

    /// Mark the environment as local.
    #[must_use]
    pub const fn with_local(mut self, is_local: bool) -> Self {
        self.is_local = is_local;
        self
    }

    /// Physical name of a logical topic.
    #[must_use]
    pub fn topic(&self, topic: &str) -> String {
        topic_with_prefix(topic, &self.topic_prefix)
    }

    /// Recommended consumer group of this service for `topic`.
    #[must_use]
    pub fn consumer_group(&self, topic: &str) -> String {
        consumer_group_name(&self.topic_prefix, &self.service_name, topic)
    }
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            brokers: Vec::new(),
            topic_prefix: String::new(),
            service_name: String::new(),
            is_local: false,
            dial_timeout: Duration::from_secs(10),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
