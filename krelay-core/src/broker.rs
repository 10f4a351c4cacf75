//! Broker collaborator traits.
//!
//! The wire protocol lives behind these traits. krelay only needs dial,
//! a liveness probe, topic creation, and per-topic readers and writers.
//! [`crate::backends`] has the in-memory and librdkafka implementations.

use crate::error::BrokerResult;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// How a reader's offsets advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommitMode {
    /// Offsets advance on read, regardless of handling outcome.
    Auto,
    /// Offsets advance only through [`Reader::commit_messages`].
    Explicit,
}

/// Settings for a consumer-group reader on one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    pub group_id: String,
    pub max_bytes: usize,
    pub max_attempts: usize,
    pub heartbeat_interval: Duration,
    pub rebalance_timeout: Duration,
    pub commit_mode: CommitMode,
}

/// Settings for a topic writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriterConfig {
    pub brokers: Vec<String>,
    pub topic: String,
    /// Send attempts per message; `u32::MAX` means retry without bound.
    pub max_attempts: u32,
}

impl WriterConfig {
    /// Writer that retries sends without bound.
    #[must_use]
    pub fn unbounded(brokers: Vec<String>, topic: impl Into<String>) -> Self {
        Self {
            brokers,
            topic: topic.into(),
            max_attempts: u32::MAX,
        }
    }
}

/// Topic creation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicConfig {
    pub name: String,
    pub partitions: i32,
    pub replication_factor: i16,
    #[serde(default)]
    pub configs: BTreeMap<String, String>,
}

impl TopicConfig {
    /// Topic with the given partitions and replication.
    pub fn new(name: impl Into<String>, partitions: i32, replication_factor: i16) -> Self {
        Self {
            name: name.into(),
            partitions,
            replication_factor,
            configs: BTreeMap::new(),
        }
    }

    /// Add a topic-level config entry such as `retention.ms`.
    #[must_use]
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configs.insert(key.into(), value.into());
        self
    }
}

/// Factory for connections, readers and writers.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open an admin connection to one broker address.
    async fn dial(&self, address: &str) -> BrokerResult<Arc<dyn Connection>>;

    /// Build a consumer-group reader. Does not block on the network.
    fn reader(&self, config: ReaderConfig) -> BrokerResult<Arc<dyn Reader>>;

    /// Build a topic writer. Does not block on the network.
    fn writer(&self, config: WriterConfig) -> BrokerResult<Arc<dyn Writer>>;
}

/// Admin connection to the cluster.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    /// Cheap liveness probe (`ApiVersions`).
    async fn api_versions(&self) -> BrokerResult<()>;

    /// Create topics.
    async fn create_topics(&self, topics: &[TopicConfig]) -> BrokerResult<()>;

    /// Close the connection.
    async fn close(&self) -> BrokerResult<()>;
}

/// Consumer-group reader on one topic.
#[async_trait]
pub trait Reader: Send + Sync + 'static {
    /// Read the next message; the group offset advances immediately.
    async fn read_message(&self) -> BrokerResult<Message>;

    /// Fetch the next message without advancing the committed offset.
    async fn fetch_message(&self) -> BrokerResult<Message>;

    /// Commit the offsets of previously fetched messages.
    async fn commit_messages(&self, messages: &[Message]) -> BrokerResult<()>;

    /// Close the reader. Later calls fail with [`crate::BrokerError::Closed`].
    async fn close(&self) -> BrokerResult<()>;
}

/// Writer bound to one topic.
#[async_trait]
pub trait Writer: Send + Sync + 'static {
    /// Send messages to the writer's topic.
    async fn write_messages(&self, messages: Vec<Message>) -> BrokerResult<()>;

    /// Flush and close the writer.
    async fn close(&self) -> BrokerResult<()>;
}
