//! Per-topic writer cache and publish paths.

use crate::error::{PublishError, Result};
use bytes::Bytes;
use krelay_core::{
    topic_with_prefix, Connector, Message, MessageContext, Span, SpanKind, Writer, WriterConfig,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};

#[derive(Default)]
struct WriterCache {
    writers: HashMap<String, Arc<dyn Writer>>,
    closed: bool,
}

/// Publishes to prefixed topics through lazily created, cached writers.
///
/// Writers are built with an unbounded send retry and live until
/// [`Publisher::close`].
pub struct Publisher {
    connector: Arc<dyn Connector>,
    brokers: Vec<String>,
    topic_prefix: String,
    cache: Mutex<WriterCache>,
}

impl Publisher {
    /// Publisher for `brokers`, prefixing every topic with `topic_prefix`.
    pub fn new(
        connector: Arc<dyn Connector>,
        brokers: Vec<String>,
        topic_prefix: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            brokers,
            topic_prefix: topic_prefix.into(),
            cache: Mutex::new(WriterCache::default()),
        }
    }

    /// Cached writer for a physical topic, created on first use.
    ///
    /// # Errors
    /// [`PublishError::Closed`] after [`Publisher::close`], or the connector's
    /// error when the writer cannot be built.
    pub fn writer(&self, topic: &str) -> Result<Arc<dyn Writer>> {
        let mut cache = self.cache.lock();
        if cache.closed {
            return Err(PublishError::Closed);
        }
        if let Some(writer) = cache.writers.get(topic) {
            return Ok(Arc::clone(writer));
        }

        let writer = self
            .connector
            .writer(WriterConfig::unbounded(self.brokers.clone(), topic))
            .map_err(|source| PublishError::Writer {
                topic: topic.to_string(),
                source,
            })?;
        debug!(topic, "Created writer");
        cache.writers.insert(topic.to_string(), Arc::clone(&writer));
        Ok(writer)
    }

    /// Publish `value` under `key` to the logical `topic`, with the identity
    /// headers of `ctx`.
    ///
    /// # Errors
    /// [`PublishError::EmptyTopic`] for an empty topic; otherwise writer
    /// creation or send failures.
    pub async fn publish_context(
        &self,
        ctx: &MessageContext,
        topic: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        let topic = self.physical_topic(topic)?;
        let message = Message::new(topic.as_str(), key, value).with_headers(ctx.outbound_headers(None));
        self.send(message)
            .instrument(info_span!("kafka.publish", topic = %topic))
            .await
    }

    /// Like [`Publisher::publish_context`], inside a producer-kind span whose
    /// trace headers travel with the message.
    ///
    /// The span joins the trace of `ctx` when it has one.
    ///
    /// # Errors
    /// See [`Publisher::publish_context`].
    pub async fn traced_publish_context(
        &self,
        ctx: &MessageContext,
        span_name: &str,
        topic: &str,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> Result<()> {
        let topic = self.physical_topic(topic)?;
        let mut span = Span::start(span_name, SpanKind::Producer, ctx.trace());
        let message = Message::new(topic.as_str(), key, value)
            .with_headers(ctx.outbound_headers(Some(span.context())));

        let result = self
            .send(message)
            .instrument(info_span!(
                "kafka.publish",
                topic = %topic,
                trace_id = %span.context().trace_id
            ))
            .await;
        if let Err(err) = &result {
            span.record_error(err);
        }
        span.end();
        result
    }

    /// Close every cached writer. Later publishes fail with
    /// [`PublishError::Closed`].
    ///
    /// Every writer is closed even if some fail; the first failure is returned.
    ///
    /// # Errors
    /// The first writer close failure.
    pub async fn close(&self) -> Result<()> {
        let writers: Vec<(String, Arc<dyn Writer>)> = {
            let mut cache = self.cache.lock();
            cache.closed = true;
            cache.writers.drain().collect()
        };

        let mut first_error = None;
        for (topic, writer) in writers {
            if let Err(source) = writer.close().await {
                error!(topic = %topic, error = %source, "Failed to close writer");
                first_error.get_or_insert(PublishError::Write { topic, source });
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Physical topics with a cached writer
    #[must_use]
    pub fn cached_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.cache.lock().writers.keys().cloned().collect();
        topics.sort();
        topics
    }

    fn physical_topic(&self, topic: &str) -> Result<String> {
        if topic.is_empty() {
            return Err(PublishError::EmptyTopic);
        }
        Ok(topic_with_prefix(topic, &self.topic_prefix))
    }

    async fn send(&self, message: Message) -> Result<()> {
        let topic = message.topic.clone();
        let key = message.key_lossy();
        let writer = self.writer(&topic)?;
        writer.write_messages(vec![message]).await.map_err(|source| {
            error!(topic = %topic, key = %key, error = %source, "Failed to publish message");
            PublishError::Write { topic, source }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krelay_core::backends::MemoryBroker;
    use krelay_core::{TraceCarrier, TraceContext, UserInfo};

    fn publisher(broker: &MemoryBroker) -> Publisher {
        Publisher::new(
            Arc::new(broker.clone()),
            vec!["memory:9092".to_string()],
            "prod.tokyo.",
        )
    }

    #[tokio::test]
    async fn test_empty_topic_is_rejected_before_network() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);

        let result = publisher.publish_context(&MessageContext::new(), "", "k", "v").await;
        assert_eq!(result, Err(PublishError::EmptyTopic));
        assert_eq!(broker.stats().writers_created, 0);
    }

    #[tokio::test]
    async fn test_writer_is_cached_per_prefixed_topic() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        let ctx = MessageContext::new();

        publisher.publish_context(&ctx, "orders", "k1", "v1").await.unwrap();
        publisher.publish_context(&ctx, "orders", "k2", "v2").await.unwrap();
        publisher.publish_context(&ctx, "payments", "k3", "v3").await.unwrap();

        assert_eq!(broker.stats().writers_created, 2);
        assert_eq!(publisher.cached_topics(), vec!["prod.tokyo.orders", "prod.tokyo.payments"]);
        assert_eq!(broker.messages("prod.tokyo.orders").len(), 2);
    }

    #[tokio::test]
    async fn test_identity_headers_round_trip() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        let ctx = MessageContext::new().with_user_info(UserInfo::new("user-7", "orgs/7/projects/1"));

        publisher.publish_context(&ctx, "orders", "k", "v").await.unwrap();

        let stored = &broker.messages("prod.tokyo.orders")[0];
        assert_eq!(UserInfo::from_message(stored), *ctx.user_info());
        assert!(TraceCarrier::from_message(stored).get_all_values().is_none());
    }

    #[tokio::test]
    async fn test_traced_publish_joins_active_trace() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        let parent = TraceContext::new_root();
        let ctx = MessageContext::new()
            .with_user_info(UserInfo::new("u", "rp"))
            .with_trace(parent.clone());

        publisher
            .traced_publish_context(&ctx, "orders.publish", "orders", "k", "v")
            .await
            .unwrap();

        let stored = &broker.messages("prod.tokyo.orders")[0];
        let (restored, remote) = MessageContext::from_message(stored);
        let remote = remote.unwrap();
        assert_eq!(remote.trace_id, parent.trace_id);
        assert_eq!(remote.parent_span_id, Some(parent.span_id));
        assert_eq!(restored.user_info().user_id, "u");
    }

    #[tokio::test]
    async fn test_close_closes_every_writer() {
        let broker = MemoryBroker::new();
        let publisher = publisher(&broker);
        let ctx = MessageContext::new();
        publisher.publish_context(&ctx, "a", "k", "v").await.unwrap();
        publisher.publish_context(&ctx, "b", "k", "v").await.unwrap();

        publisher.close().await.unwrap();
        assert_eq!(broker.stats().writer_closes, 2);
        assert_eq!(
            publisher.publish_context(&ctx, "a", "k", "v").await,
            Err(PublishError::Closed)
        );
    }
}
