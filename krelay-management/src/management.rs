//! The `KafkaManagement` facade.

use crate::connection::ConnectionManager;
use crate::error::{ManagementError, Result};
use crate::registry::Registry;
use crate::supervisor::supervise;
use bytes::Bytes;
use krelay_consumer::{
    new_consumer, ConsumerBase, ConsumerMetrics, ConsumerOption, MessageHandler, MetricsSnapshot,
    OptionFn,
};
use krelay_core::{
    BrokerError, ConfigLoader, Connection, Connector, ManagementConfig, MessageContext, TopicConfig,
};
use krelay_publisher::Publisher;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use validator::Validate;

/// Single entry point for publishing, consuming, topic administration and
/// shutdown.
///
/// Owns the writer cache, the consumer-group registry, the admin connection
/// and one supervising task per running consumer. Every topic crossing this
/// boundary gets the configured prefix.
pub struct KafkaManagement {
    config: ManagementConfig,
    connector: Arc<dyn Connector>,
    connection: ConnectionManager,
    publisher: Publisher,
    registry: Arc<Mutex<Registry>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
    metrics: Arc<ConsumerMetrics>,
}

impl KafkaManagement {
    /// Facade over `connector`. Does not dial; see
    /// [`KafkaManagement::connect_to_kafka`].
    ///
    /// # Errors
    /// [`ManagementError::Bootstrap`] when the config is invalid, e.g. no
    /// broker address.
    pub fn new(config: ManagementConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        if config.brokers.is_empty() {
            return Err(ManagementError::Bootstrap {
                message: "missing broker address".to_string(),
            });
        }
        config.validate().map_err(|err| ManagementError::Bootstrap {
            message: err.to_string(),
        })?;

        Ok(Self {
            connection: ConnectionManager::new(
                Arc::clone(&connector),
                config.brokers.clone(),
                config.dial_timeout,
            ),
            publisher: Publisher::new(
                Arc::clone(&connector),
                config.brokers.clone(),
                config.topic_prefix.clone(),
            ),
            config,
            connector,
            registry: Arc::new(Mutex::new(Registry::default())),
            tracker: TaskTracker::new(),
            shutdown: CancellationToken::new(),
            metrics: Arc::new(ConsumerMetrics::new()),
        })
    }

    /// Facade configured from `krelay.toml` and `KRELAY_*` variables.
    ///
    /// # Errors
    /// Configuration loading or validation failures.
    pub fn from_env(connector: Arc<dyn Connector>) -> Result<Self> {
        Self::new(ConfigLoader::new().load()?, connector)
    }

    /// The facade's configuration
    #[must_use]
    pub const fn config(&self) -> &ManagementConfig {
        &self.config
    }

    /// Dial the brokers.
    ///
    /// # Errors
    /// [`ManagementError::Connect`] when no address answers.
    pub async fn try_connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    /// Dial the brokers, terminating the process on failure.
    ///
    /// A bootstrap step: nothing useful can run without a broker.
    pub async fn connect_to_kafka(&self) {
        if let Err(err) = self.try_connect().await {
            error!(brokers = ?self.config.brokers, error = %err, "Unable to connect to Kafka");
            std::process::exit(1);
        }
    }

    /// Live admin connection, redialed if the liveness probe fails.
    ///
    /// # Errors
    /// [`ManagementError::Connect`] when redialing fails.
    pub async fn connection(&self) -> Result<Arc<dyn Connection>> {
        self.connection.get().await
    }

    /// Publish to the prefixed `topic` with the identity headers of `ctx`.
    ///
    /// # Errors
    /// Empty topic, writer creation or send failures.
    pub async fn publish_context(
        &self,
        ctx: &MessageContext,
        topic: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        Ok(self.publisher.publish_context(ctx, topic, key, value).await?)
    }

    /// Publish inside a producer span, attaching trace and identity headers.
    ///
    /// # Errors
    /// See [`KafkaManagement::publish_context`].
    pub async fn traced_publish_context(
        &self,
        ctx: &MessageContext,
        span_name: &str,
        topic: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        Ok(self
            .publisher
            .traced_publish_context(ctx, span_name, topic, key, value)
            .await?)
    }

    /// Create a topic if it does not exist yet.
    ///
    /// The prefix is applied to `cfg.name`; local environments get a
    /// replication factor of 1.
    ///
    /// # Errors
    /// Connection or creation failures, logged as well.
    pub async fn upsert_topic(&self, mut cfg: TopicConfig) -> Result<()> {
        if cfg.name.is_empty() {
            return Err(ManagementError::EmptyTopic);
        }
        cfg.name = self.config.topic(&cfg.name);
        if self.config.is_local {
            cfg.replication_factor = 1;
        }

        let connection = self.connection.get().await.map_err(|err| {
            error!(topic = %cfg.name, error = %err, "No broker connection for topic upsert");
            err
        })?;
        match connection.create_topics(std::slice::from_ref(&cfg)).await {
            Ok(()) => {
                info!(
                    topic = %cfg.name,
                    partitions = cfg.partitions,
                    replication_factor = cfg.replication_factor,
                    "Topic created"
                );
                Ok(())
            },
            Err(BrokerError::TopicAlreadyExists { .. }) => {
                debug!(topic = %cfg.name, "Topic already exists");
                Ok(())
            },
            Err(err) => {
                error!(topic = %cfg.name, error = %err, "Failed to create topic");
                Err(err.into())
            },
        }
    }

    /// Register one more consumer for `group_id` on `topic` and start every
    /// consumer of that group that is not running.
    ///
    /// Options resolve as defaults, then the broker/topic/group binding, then
    /// `options`. Returns once the workers are spawned; must be called inside
    /// a tokio runtime.
    ///
    /// # Errors
    /// Empty topic or group, an invalid option, reader creation failure, no
    /// runtime, or a closed facade. Nothing is spawned on error.
    pub fn consume<H>(
        &self,
        topic: &str,
        group_id: &str,
        options: Vec<OptionFn>,
        handler: H,
    ) -> Result<()>
    where
        H: MessageHandler,
    {
        if topic.is_empty() {
            return Err(ManagementError::EmptyTopic);
        }
        if group_id.is_empty() {
            return Err(ManagementError::EmptyGroupId);
        }
        let runtime = Handle::try_current().map_err(|_| ManagementError::NoRuntime)?;

        let topic = self.config.topic(topic);
        let option = ConsumerOption::resolve(self.config.brokers.clone(), topic.as_str(), group_id, options)?;

        let mut registry = self.registry.lock();
        if registry.is_closed() {
            return Err(ManagementError::Closed);
        }
        let reader = self.connector.reader(option.reader_config()).map_err(|err| {
            error!(topic = %topic, group_id, error = %err, "Failed to create reader");
            err
        })?;
        let consumer = new_consumer(ConsumerBase::new(
            reader,
            option,
            Arc::new(handler),
            Arc::clone(&self.metrics),
            self.shutdown.child_token(),
        ));

        let group = registry.group_mut(&topic, group_id);
        group.push(consumer);
        for consumer in group.consumers() {
            if consumer.base().is_running() {
                continue;
            }
            consumer.base().set_running(true);
            self.tracker.spawn_on(
                supervise(Arc::clone(consumer), Arc::clone(&self.registry)),
                &runtime,
            );
        }
        info!(
            topic = %topic,
            group_id,
            consumers = group.consumers().len(),
            "Consumer registered"
        );
        Ok(())
    }

    /// Orderly shutdown: close writers, cancel every consumer, wait for all
    /// supervising tasks to exit, close the readers, close the connection.
    ///
    /// # Errors
    /// The first writer or connection close failure. Reader close failures
    /// are logged only.
    pub async fn close(&self) -> Result<()> {
        info!("Closing kafka management");
        let publish_result = self.publisher.close().await;

        let readers: Vec<_> = {
            let mut registry = self.registry.lock();
            registry.mark_closed();
            registry
                .consumers()
                .map(|consumer| {
                    let base = consumer.base();
                    base.set_running(false);
                    base.cancel();
                    base.reader()
                })
                .collect()
        };
        self.shutdown.cancel();

        self.tracker.close();
        self.tracker.wait().await;

        for reader in readers {
            if let Err(err) = reader.close().await {
                warn!(error = %err, "Failed to close reader");
            }
        }

        self.connection.close().await?;
        publish_result?;
        info!("Kafka management closed");
        Ok(())
    }

    /// Processed-message counters across every consumer
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Consumers registered for `group_id` on the logical `topic`
    #[must_use]
    pub fn consumer_count(&self, topic: &str, group_id: &str) -> usize {
        let topic = self.config.topic(topic);
        self.registry
            .lock()
            .group(&topic, group_id)
            .map_or(0, |group| group.consumers().len())
    }

    /// Consumers whose supervising task is currently running
    #[must_use]
    pub fn running_consumers(&self) -> usize {
        self.registry
            .lock()
            .consumers()
            .filter(|consumer| consumer.base().is_running())
            .count()
    }

    /// Recommended consumer group of this service for `topic`
    #[must_use]
    pub fn consumer_group_name(&self, topic: &str) -> String {
        self.config.consumer_group(topic)
    }
}
