//! librdkafka backend
//!
//! Implements the collaborator traits over `rdkafka`: an `AdminClient` for
//! the connection, one `StreamConsumer` per reader and one `FutureProducer`
//! per writer. Enabled with the `rdkafka` cargo feature.
//!
//! Blocking librdkafka calls (metadata, synchronous commit, flush) run on
//! the blocking pool. `ReaderConfig::max_attempts` has no librdkafka
//! counterpart: the client reconnects on its own, bounded by
//! `reconnect.backoff.max.ms`, so the value is only logged.

use crate::{
    broker::{CommitMode, Connection, Connector, Reader, ReaderConfig, TopicConfig, Writer, WriterConfig},
    error::{BrokerError, BrokerResult},
    message::{Header, Message},
    types::{Offset, PartitionId},
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rdkafka::{
    admin::{AdminClient, AdminOptions, NewTopic, TopicReplication},
    client::DefaultClientContext,
    config::ClientConfig,
    consumer::{CommitMode as RdCommitMode, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::{Header as RdHeader, Headers, Message as _, OwnedHeaders},
    producer::{FutureProducer, FutureRecord, Producer},
    util::Timeout,
    Offset as RdOffset, TopicPartitionList,
};
use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::debug;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

fn map_err(err: KafkaError) -> BrokerError {
    match err {
        KafkaError::PartitionEOF(_) | KafkaError::Canceled => BrokerError::Closed,
        other => BrokerError::network(other.to_string()),
    }
}

/// Connector backed by librdkafka.
#[derive(Debug, Clone)]
pub struct RdKafkaConnector {
    overrides: BTreeMap<String, String>,
    request_timeout: Duration,
}

impl Default for RdKafkaConnector {
    fn default() -> Self {
        Self {
            overrides: BTreeMap::new(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RdKafkaConnector {
    /// Connector with librdkafka defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Extra librdkafka property applied to every client (TLS, SASL, ...).
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    /// Timeout for admin requests and the liveness probe.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn client_config(&self, brokers: &str) -> ClientConfig {
        let mut config = ClientConfig::new();
        config.set("bootstrap.servers", brokers);
        for (key, value) in &self.overrides {
            config.set(key, value);
        }
        config
    }
}

#[async_trait]
impl Connector for RdKafkaConnector {
    async fn dial(&self, address: &str) -> BrokerResult<Arc<dyn Connection>> {
        let admin: AdminClient<DefaultClientContext> =
            self.client_config(address).create().map_err(map_err)?;
        let connection = RdKafkaConnection {
            admin: Arc::new(admin),
            timeout: self.request_timeout,
            closed: AtomicBool::new(false),
        };
        connection.api_versions().await?;
        Ok(Arc::new(connection))
    }

    fn reader(&self, config: ReaderConfig) -> BrokerResult<Arc<dyn Reader>> {
        let auto_commit = config.commit_mode == CommitMode::Auto;
        let consumer: StreamConsumer = self
            .client_config(&config.brokers.join(","))
            .set("group.id", &config.group_id)
            .set("enable.auto.commit", auto_commit.to_string())
            .set("auto.offset.reset", "earliest")
            .set("fetch.max.bytes", config.max_bytes.to_string())
            .set(
                "heartbeat.interval.ms",
                config.heartbeat_interval.as_millis().to_string(),
            )
            .set(
                "max.poll.interval.ms",
                config.rebalance_timeout.as_millis().to_string(),
            )
            .create()
            .map_err(map_err)?;
        consumer.subscribe(&[config.topic.as_str()]).map_err(map_err)?;
        debug!(
            topic = %config.topic,
            group_id = %config.group_id,
            max_attempts = config.max_attempts,
            "librdkafka manages reconnects; max connect attempts not applied"
        );

        Ok(Arc::new(RdKafkaReader {
            consumer: Arc::new(consumer),
            closed: AtomicBool::new(false),
        }))
    }

    fn writer(&self, config: WriterConfig) -> BrokerResult<Arc<dyn Writer>> {
        let retries = config.max_attempts.saturating_sub(1).min(i32::MAX as u32);
        let producer: FutureProducer = self
            .client_config(&config.brokers.join(","))
            .set("message.send.max.retries", retries.to_string())
            .create()
            .map_err(map_err)?;

        Ok(Arc::new(RdKafkaWriter {
            producer,
            topic: config.topic,
            closed: AtomicBool::new(false),
        }))
    }
}

struct RdKafkaConnection {
    admin: Arc<AdminClient<DefaultClientContext>>,
    timeout: Duration,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for RdKafkaConnection {
    async fn api_versions(&self) -> BrokerResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let admin = Arc::clone(&self.admin);
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || admin.inner().fetch_metadata(None, timeout).map(|_| ()))
            .await
            .map_err(|e| BrokerError::network(format!("metadata probe aborted: {e}")))?
            .map_err(map_err)
    }

    async fn create_topics(&self, topics: &[TopicConfig]) -> BrokerResult<()> {
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|topic| {
                topic.configs.iter().fold(
                    NewTopic::new(
                        &topic.name,
                        topic.partitions,
                        TopicReplication::Fixed(i32::from(topic.replication_factor)),
                    ),
                    |new_topic, (key, value)| new_topic.set(key, value),
                )
            })
            .collect();

        let options = AdminOptions::new().operation_timeout(Some(self.timeout));
        let results = self
            .admin
            .create_topics(new_topics.iter(), &options)
            .await
            .map_err(map_err)?;

        for result in results {
            match result {
                Ok(_) => {},
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(BrokerError::TopicAlreadyExists { topic });
                },
                Err((topic, code)) => {
                    return Err(BrokerError::Rejected {
                        message: format!("create topic {topic}: {code}"),
                    });
                },
            }
        }
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct RdKafkaReader {
    consumer: Arc<StreamConsumer>,
    closed: AtomicBool,
}

impl RdKafkaReader {
    async fn recv(&self) -> BrokerResult<Message> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let borrowed = self.consumer.recv().await.map_err(map_err)?;

        let headers = borrowed
            .headers()
            .map(|headers| {
                headers
                    .iter()
                    .filter_map(|h| {
                        h.value
                            .map(|v| Header::new(h.key, String::from_utf8_lossy(v).into_owned()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        let timestamp = borrowed
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Ok(Message {
            topic: borrowed.topic().to_string(),
            partition: PartitionId::new(borrowed.partition()),
            offset: Offset::new(borrowed.offset()),
            key: Bytes::copy_from_slice(borrowed.key().unwrap_or_default()),
            value: Bytes::copy_from_slice(borrowed.payload().unwrap_or_default()),
            headers,
            timestamp,
        })
    }
}

#[async_trait]
impl Reader for RdKafkaReader {
    async fn read_message(&self) -> BrokerResult<Message> {
        self.recv().await
    }

    async fn fetch_message(&self) -> BrokerResult<Message> {
        self.recv().await
    }

    async fn commit_messages(&self, messages: &[Message]) -> BrokerResult<()> {
        let mut offsets = TopicPartitionList::new();
        for message in messages {
            offsets
                .add_partition_offset(
                    &message.topic,
                    message.partition.value(),
                    RdOffset::Offset(message.offset.next().value()),
                )
                .map_err(map_err)?;
        }
        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, RdCommitMode::Sync))
            .await
            .map_err(|e| BrokerError::network(format!("commit aborted: {e}")))?
            .map_err(map_err)
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.consumer.unsubscribe();
        }
        Ok(())
    }
}

struct RdKafkaWriter {
    producer: FutureProducer,
    topic: String,
    closed: AtomicBool,
}

#[async_trait]
impl Writer for RdKafkaWriter {
    async fn write_messages(&self, messages: Vec<Message>) -> BrokerResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        for message in &messages {
            let headers = message.headers.iter().fold(OwnedHeaders::new(), |acc, h| {
                acc.insert(RdHeader {
                    key: &h.key,
                    value: Some(h.value.as_bytes()),
                })
            });
            let record = FutureRecord::to(&self.topic)
                .key(&message.key[..])
                .payload(&message.value[..])
                .headers(headers);

            self.producer
                .send(record, Timeout::Never)
                .await
                .map_err(|(err, _)| map_err(err))?;
        }
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let producer = self.producer.clone();
        tokio::task::spawn_blocking(move || producer.flush(FLUSH_TIMEOUT))
            .await
            .map_err(|e| BrokerError::network(format!("flush aborted: {e}")))?
            .map_err(map_err)
    }
}
