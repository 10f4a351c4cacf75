//! Delivery-guarantee consumers.
//!
//! [`StrictConsumer`] fetches without advancing the committed offset and
//! commits explicitly after the handler succeeds; a handler that fails for
//! good halts it. [`LooseConsumer`] reads with auto-commit and moves on
//! whatever the handler says. Both share [`ConsumerBase`] for the reader,
//! retry policy, context restoration and handler invocation.

use crate::error::{ConsumerError, Result};
use crate::handler::MessageHandler;
use crate::metrics::{ConsumerMetrics, ProcessStatus};
use crate::options::ConsumerOption;
use crate::retry::{sleep_or_cancel, RetryError, RetryPolicy};
use async_trait::async_trait;
use chrono::Utc;
use krelay_core::{BrokerError, Message, MessageContext, Reader, Span, SpanKind, TraceCarrier};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, field, info_span, warn, Instrument};

/// What the supervising loop does after `handle_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleOutcome {
    /// Continue with `complete_message` and the next read
    pub proceed: bool,
    /// Final handler failure, if any
    pub error: Option<ConsumerError>,
}

impl HandleOutcome {
    /// Handler succeeded.
    #[must_use]
    pub const fn proceed() -> Self {
        Self {
            proceed: true,
            error: None,
        }
    }

    /// Handler failed; the loop moves on anyway.
    #[must_use]
    pub const fn skip(error: ConsumerError) -> Self {
        Self {
            proceed: true,
            error: Some(error),
        }
    }

    /// Handler failed; the loop stops.
    #[must_use]
    pub const fn halt(error: ConsumerError) -> Self {
        Self {
            proceed: false,
            error: Some(error),
        }
    }
}

/// One reader plus the state shared by both delivery variants.
pub struct ConsumerBase {
    reader: Arc<dyn Reader>,
    option: ConsumerOption,
    handler: Arc<dyn MessageHandler>,
    metrics: Arc<ConsumerMetrics>,
    cancel: CancellationToken,
    running: AtomicBool,
}

impl ConsumerBase {
    /// Wrap `reader`. The consumer starts not running.
    pub fn new(
        reader: Arc<dyn Reader>,
        option: ConsumerOption,
        handler: Arc<dyn MessageHandler>,
        metrics: Arc<ConsumerMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            reader,
            option,
            handler,
            metrics,
            cancel,
            running: AtomicBool::new(false),
        }
    }

    /// Resolved options
    #[must_use]
    pub const fn option(&self) -> &ConsumerOption {
        &self.option
    }

    /// Underlying reader
    #[must_use]
    pub fn reader(&self) -> Arc<dyn Reader> {
        Arc::clone(&self.reader)
    }

    /// Cancellation context of this consumer
    #[must_use]
    pub const fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Signal the consumer to stop.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether [`ConsumerBase::cancel`] was called
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether a supervising task currently owns this consumer
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Set the running flag. Callers flip it under the registry lock.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    async fn with_reconnect<T, F, Fut>(
        &self,
        operation: &'static str,
        wrap: fn(BrokerError) -> ConsumerError,
        f: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, BrokerError>>,
    {
        let policy = RetryPolicy::new(
            self.option.reconnect_attempts,
            self.option.waiting_time_to_reconnect,
        );
        match policy
            .run(operation, &self.cancel, |e: &BrokerError| !e.is_eof(), f)
            .await
        {
            Ok(value) => Ok(value),
            Err(RetryError::Failed { error, attempts }) => {
                let err = wrap(error);
                error!(
                    topic = %self.option.topic,
                    group_id = %self.option.group_id,
                    attempts,
                    error = %err,
                    "Broker operation failed"
                );
                Err(err)
            },
            Err(RetryError::Cancelled) => Err(ConsumerError::Cancelled),
        }
    }

    fn is_stale(&self, message: &Message) -> bool {
        let Some(max_age) = self.option.skip_messages_older_than else {
            return false;
        };
        Utc::now()
            .signed_duration_since(message.timestamp)
            .to_std()
            .map_or(false, |age| age > max_age)
    }

    /// Restore the message context and run the handler under the retry
    /// policy and processing timeout.
    ///
    /// A consumer-kind span is opened only when the message carries trace
    /// headers; it starts a new trace when they do not parse. Every handler
    /// attempt reports to that one span.
    pub async fn process(&self, message: &Message) -> Result<()> {
        if self.is_stale(message) {
            warn!(
                topic = %message.topic,
                partition = message.partition.value(),
                offset = message.offset.value(),
                key = %message.key_lossy(),
                "Skipping message older than the configured age"
            );
            self.metrics.record(ProcessStatus::SkippedOld);
            return Ok(());
        }

        let (ctx, remote) = MessageContext::from_message(message);
        let traced = remote.is_some() || TraceCarrier::from_message(message).get_all_values().is_some();
        let mut span = traced
            .then(|| Span::start(self.option.span_name.clone(), SpanKind::Consumer, remote.as_ref()));
        let ctx = match &span {
            Some(span) => ctx.with_trace(span.context().clone()),
            None => ctx,
        };

        let log_span = info_span!(
            "kafka.consume",
            topic = %message.topic,
            partition = message.partition.value(),
            offset = message.offset.value(),
            trace_id = field::Empty,
        );
        if let Some(span) = &span {
            log_span.record("trace_id", field::display(span.context().trace_id));
        }

        let timeout = self.option.processing_timeout;
        let started = Instant::now();
        let result = match tokio::time::timeout(timeout, self.call_handler(&ctx, message, span.as_mut()))
            .instrument(log_span)
            .await
        {
            Ok(result) => result,
            Err(_) => Err(ConsumerError::ProcessingTimeout(timeout)),
        };

        match &result {
            Ok(()) => {
                self.metrics.record(ProcessStatus::Ok);
                self.metrics.record_latency(started.elapsed());
            },
            Err(ConsumerError::Cancelled) => {},
            Err(err) => {
                self.metrics.record(ProcessStatus::HandlerError);
                if let Some(span) = span.as_mut() {
                    span.record_error(err);
                }
                error!(
                    topic = %message.topic,
                    partition = message.partition.value(),
                    offset = message.offset.value(),
                    key = %message.key_lossy(),
                    error = %err,
                    "Message handling failed"
                );
            },
        }
        if let Some(span) = span {
            span.end();
        }
        result
    }

    async fn call_handler(
        &self,
        ctx: &MessageContext,
        message: &Message,
        mut span: Option<&mut Span>,
    ) -> Result<()> {
        let policy = RetryPolicy::new(
            self.option.retry_logic_attempts,
            self.option.waiting_time_to_retry_logic,
        );
        let mut attempt = 1;
        loop {
            let error = match self.handler.handle(ctx, message.value.clone()).await {
                Ok(()) => return Ok(()),
                Err(error) => error,
            };
            if let Some(span) = span.as_deref_mut() {
                span.record_error(&error);
            }

            if !error.is_retryable() || attempt >= policy.attempts() {
                return Err(ConsumerError::Handler {
                    attempts: attempt,
                    message: error.message().to_string(),
                });
            }

            warn!(
                attempt,
                max_attempts = policy.attempts(),
                error = %error,
                "Handler failed, retrying"
            );
            if !sleep_or_cancel(&self.cancel, policy.backoff()).await {
                return Err(ConsumerError::Cancelled);
            }
            attempt += 1;
        }
    }
}

/// The read, handle and complete steps of one delivery variant.
#[async_trait]
pub trait Consumer: Send + Sync + 'static {
    /// Shared state
    fn base(&self) -> &ConsumerBase;

    /// Obtain the next message, retrying network failures.
    async fn read_message(&self) -> Result<Message>;

    /// Run the handler and decide whether the loop continues.
    async fn handle_message(&self, message: &Message) -> HandleOutcome;

    /// Mark the message done.
    async fn complete_message(&self, message: &Message) -> Result<()>;
}

/// At-least-once consumer.
///
/// A message that was fetched but never committed, because its handler or
/// its commit failed, is kept and delivered again by the next
/// `read_message` before anything new is fetched.
pub struct StrictConsumer {
    base: ConsumerBase,
    pending: Mutex<Option<Message>>,
}

impl StrictConsumer {
    /// Strict consumer over `base`.
    #[must_use]
    pub fn new(base: ConsumerBase) -> Self {
        Self {
            base,
            pending: Mutex::new(None),
        }
    }

    fn keep_pending(&self, message: &Message) {
        *self.pending.lock() = Some(message.clone());
    }
}

#[async_trait]
impl Consumer for StrictConsumer {
    fn base(&self) -> &ConsumerBase {
        &self.base
    }

    async fn read_message(&self) -> Result<Message> {
        let pending = self.pending.lock().take();
        if let Some(message) = pending {
            debug!(
                topic = %message.topic,
                partition = message.partition.value(),
                offset = message.offset.value(),
                "Redelivering uncommitted message"
            );
            return Ok(message);
        }
        self.base
            .with_reconnect("reader.FetchMessage", ConsumerError::Fetch, || {
                self.base.reader.fetch_message()
            })
            .await
    }

    async fn handle_message(&self, message: &Message) -> HandleOutcome {
        match self.base.process(message).await {
            Ok(()) => HandleOutcome::proceed(),
            Err(err) => {
                self.keep_pending(message);
                HandleOutcome::halt(err)
            },
        }
    }

    async fn complete_message(&self, message: &Message) -> Result<()> {
        let result = self
            .base
            .with_reconnect("reader.CommitMessages", ConsumerError::Commit, || {
                self.base.reader.commit_messages(std::slice::from_ref(message))
            })
            .await;

        match &result {
            Ok(()) => debug!(
                topic = %message.topic,
                partition = message.partition.value(),
                offset = message.offset.value(),
                "Offset committed"
            ),
            Err(err) => {
                if !err.is_cancelled() {
                    self.base.metrics.record(ProcessStatus::CommitError);
                }
                self.keep_pending(message);
            },
        }
        result
    }
}

/// Best-effort consumer.
pub struct LooseConsumer {
    base: ConsumerBase,
}

impl LooseConsumer {
    /// Loose consumer over `base`.
    #[must_use]
    pub const fn new(base: ConsumerBase) -> Self {
        Self { base }
    }
}

#[async_trait]
impl Consumer for LooseConsumer {
    fn base(&self) -> &ConsumerBase {
        &self.base
    }

    async fn read_message(&self) -> Result<Message> {
        self.base
            .with_reconnect("reader.ReadMessage", ConsumerError::Read, || {
                self.base.reader.read_message()
            })
            .await
    }

    async fn handle_message(&self, message: &Message) -> HandleOutcome {
        match self.base.process(message).await {
            Ok(()) => HandleOutcome::proceed(),
            Err(err) => HandleOutcome::skip(err),
        }
    }

    async fn complete_message(&self, _message: &Message) -> Result<()> {
        Ok(())
    }
}

/// The variant selected by `base.option().strict_commit`.
#[must_use]
pub fn new_consumer(base: ConsumerBase) -> Arc<dyn Consumer> {
    if base.option.strict_commit {
        Arc::new(StrictConsumer::new(base))
    } else {
        Arc::new(LooseConsumer::new(base))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerError;
    use crate::options::{self, OptionFn};
    use bytes::Bytes;
    use krelay_core::backends::MemoryBroker;
    use krelay_core::carrier::B3_SAMPLED_HEADER;
    use krelay_core::{Connector, Header, TraceContext, UserInfo};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn resolve(strict: bool, extra: Vec<OptionFn>) -> ConsumerOption {
        let mut caller = vec![
            options::reconnect_attempts(3),
            options::retry_logic_attempts(3),
        ];
        if !strict {
            caller.push(options::auto_commit());
        }
        caller.extend(extra);
        ConsumerOption::resolve(vec!["memory:9092".to_string()], "orders", "g", caller).unwrap()
    }

    fn build(
        broker: &MemoryBroker,
        option: ConsumerOption,
        handler: impl MessageHandler,
    ) -> (Arc<dyn Consumer>, Arc<ConsumerMetrics>) {
        let reader = broker.reader(option.reader_config()).unwrap();
        let metrics = Arc::new(ConsumerMetrics::new());
        let base = ConsumerBase::new(
            reader,
            option,
            Arc::new(handler),
            Arc::clone(&metrics),
            CancellationToken::new(),
        );
        (new_consumer(base), metrics)
    }

    fn counting_handler(
        calls: &Arc<AtomicU32>,
        outcome: Option<HandlerError>,
    ) -> impl MessageHandler {
        let calls = Arc::clone(calls);
        move |_ctx: MessageContext, _payload: Bytes| {
            calls.fetch_add(1, Ordering::SeqCst);
            let outcome = outcome.clone();
            async move {
                match outcome {
                    Some(err) => Err(err),
                    None => Ok(()),
                }
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_succeeds_on_last_attempt() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));
        broker.fail_next_fetches(2);

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(&broker, resolve(true, vec![]), counting_handler(&calls, None));

        let message = consumer.read_message().await.unwrap();
        assert_eq!(&message.value[..], b"v");
        assert_eq!(broker.stats().fetches, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_fails_after_ceiling() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));
        broker.fail_next_fetches(4);

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(&broker, resolve(true, vec![]), counting_handler(&calls, None));

        let err = consumer.read_message().await.unwrap_err();
        assert!(matches!(err, ConsumerError::Fetch(BrokerError::Network { .. })));
        assert!(err.to_string().starts_with("error reader.FetchMessage"));
        assert_eq!(broker.stats().fetches, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_fails_after_ceiling() {
        let broker = MemoryBroker::new();
        broker.fail_next_reads(4);

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(&broker, resolve(false, vec![]), counting_handler(&calls, None));

        let err = consumer.read_message().await.unwrap_err();
        assert!(err.to_string().starts_with("error reader.ReadMessage"));
    }

    #[tokio::test]
    async fn test_closed_reader_is_not_retried() {
        let broker = MemoryBroker::new();
        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(&broker, resolve(true, vec![]), counting_handler(&calls, None));

        consumer.base().reader().close().await.unwrap();
        let err = consumer.read_message().await.unwrap_err();
        assert_eq!(err, ConsumerError::Fetch(BrokerError::Closed));
        assert_eq!(broker.stats().fetches, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loose_continues_after_exhausted_handler() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, metrics) = build(
            &broker,
            resolve(false, vec![]),
            counting_handler(&calls, Some(HandlerError::retryable("boom"))),
        );

        let message = consumer.read_message().await.unwrap();
        let outcome = consumer.handle_message(&message).await;
        assert!(outcome.proceed);
        assert!(matches!(outcome.error, Some(ConsumerError::Handler { attempts: 3, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        consumer.complete_message(&message).await.unwrap();
        assert_eq!(broker.stats().commit_calls, 0);
        assert!(broker.commit_log().is_empty());
        assert_eq!(metrics.snapshot().handler_error, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_halts_after_exhausted_handler() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(
            &broker,
            resolve(true, vec![]),
            counting_handler(&calls, Some(HandlerError::retryable("boom"))),
        );

        let message = consumer.read_message().await.unwrap();
        let outcome = consumer.handle_message(&message).await;
        assert!(!outcome.proceed);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(broker.commit_log().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_handler_error_is_not_retried() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(
            &broker,
            resolve(true, vec![]),
            counting_handler(&calls, Some(HandlerError::permanent("bad payload"))),
        );

        let message = consumer.read_message().await.unwrap();
        let outcome = consumer.handle_message(&message).await;
        assert_eq!(
            outcome,
            HandleOutcome::halt(ConsumerError::Handler {
                attempts: 1,
                message: "bad payload".to_string()
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_strict_commits_exact_message_once() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k1", "v1"));

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, metrics) =
            build(&broker, resolve(true, vec![]), counting_handler(&calls, None));

        let message = consumer.read_message().await.unwrap();
        assert!(consumer.handle_message(&message).await.proceed);
        consumer.complete_message(&message).await.unwrap();

        let commits = broker.commit_log();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].offset, message.offset);
        assert_eq!(commits[0].key, message.key);
        assert_eq!(broker.stats().commit_calls, 1);
        assert_eq!(metrics.snapshot().ok, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commit_failure_is_wrapped() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k1", "v1"));
        broker.fail_next_commits(3);

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, metrics) =
            build(&broker, resolve(true, vec![]), counting_handler(&calls, None));

        let message = consumer.read_message().await.unwrap();
        let err = consumer.complete_message(&message).await.unwrap_err();
        assert!(err.to_string().starts_with("error reader.CommitMessages"));
        assert_eq!(metrics.snapshot().commit_error, 1);
    }

    #[tokio::test]
    async fn test_context_restored_and_trace_only_when_present() {
        let broker = MemoryBroker::new();
        let identity = UserInfo::new("user-1", "orgs/1");
        let trace = TraceContext::new_root();

        let plain = MessageContext::new().with_user_info(identity.clone());
        broker.produce(
            "orders",
            Message::new("orders", "k1", "plain").with_headers(plain.outbound_headers(None)),
        );
        broker.produce(
            "orders",
            Message::new("orders", "k2", "traced").with_headers(plain.outbound_headers(Some(&trace))),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |ctx: MessageContext, payload: Bytes| {
            sink.lock().push((ctx, payload));
            async { Ok::<(), HandlerError>(()) }
        };
        let (consumer, _) = build(&broker, resolve(true, vec![]), handler);

        for _ in 0..2 {
            let message = consumer.read_message().await.unwrap();
            assert!(consumer.handle_message(&message).await.proceed);
        }

        let seen = seen.lock();
        assert_eq!(seen[0].0.user_info(), &identity);
        assert!(seen[0].0.trace().is_none());
        assert_eq!(&seen[0].1[..], b"plain");

        let child = seen[1].0.trace().unwrap();
        assert_eq!(seen[1].0.user_info(), &identity);
        assert_eq!(child.trace_id, trace.trace_id);
        assert_eq!(child.parent_span_id, Some(trace.span_id));
    }

    #[tokio::test]
    async fn test_stale_message_is_skipped() {
        let broker = MemoryBroker::new();
        let old = Utc::now() - chrono::Duration::hours(2);
        broker.produce("orders", Message::new("orders", "k", "v").with_timestamp(old));

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, metrics) = build(
            &broker,
            resolve(true, vec![options::skip_messages_older_than(Duration::from_secs(3600))]),
            counting_handler(&calls, None),
        );

        let message = consumer.read_message().await.unwrap();
        assert!(consumer.handle_message(&message).await.proceed);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(metrics.snapshot().skipped_old, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_processing_timeout_is_a_handler_failure() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));

        let handler = |_ctx: MessageContext, _payload: Bytes| async {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok::<(), HandlerError>(())
        };
        let (consumer, _) = build(
            &broker,
            resolve(true, vec![options::processing_timeout(Duration::from_secs(1))]),
            handler,
        );

        let message = consumer.read_message().await.unwrap();
        let outcome = consumer.handle_message(&message).await;
        assert_eq!(
            outcome,
            HandleOutcome::halt(ConsumerError::ProcessingTimeout(Duration::from_secs(1)))
        );
    }

    #[tokio::test]
    async fn test_cancel_interrupts_handler_backoff() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, metrics) = build(
            &broker,
            resolve(true, vec![]),
            counting_handler(&calls, Some(HandlerError::retryable("boom"))),
        );

        let message = consumer.read_message().await.unwrap();
        consumer.base().cancel();
        let outcome = consumer.handle_message(&message).await;
        assert_eq!(outcome, HandleOutcome::halt(ConsumerError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(metrics.snapshot().handler_error, 0);
    }

    #[tokio::test]
    async fn test_strict_redelivers_failed_message_before_fetching() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "bad", "poison"));
        broker.produce("orders", Message::new("orders", "good", "fine"));

        let failing = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&failing);
        let handler = move |_ctx: MessageContext, _payload: Bytes| {
            let fail = flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    return Err(HandlerError::permanent("cannot decode"));
                }
                Ok(())
            }
        };
        let (consumer, _) = build(&broker, resolve(true, vec![]), handler);

        let poison = consumer.read_message().await.unwrap();
        assert!(!consumer.handle_message(&poison).await.proceed);

        failing.store(false, Ordering::SeqCst);
        let again = consumer.read_message().await.unwrap();
        assert_eq!(again.offset, poison.offset);
        assert_eq!(broker.stats().fetches, 1);

        assert!(consumer.handle_message(&again).await.proceed);
        consumer.complete_message(&again).await.unwrap();
        let next = consumer.read_message().await.unwrap();
        assert_eq!(&next.value[..], b"fine");
        assert_eq!(broker.commit_log()[0].offset, poison.offset);
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_redelivers_after_commit_failure() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k1", "v1"));
        broker.produce("orders", Message::new("orders", "k2", "v2"));
        broker.fail_next_commits(3);

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(&broker, resolve(true, vec![]), counting_handler(&calls, None));

        let first = consumer.read_message().await.unwrap();
        assert!(consumer.handle_message(&first).await.proceed);
        assert!(consumer.complete_message(&first).await.is_err());

        let again = consumer.read_message().await.unwrap();
        assert_eq!(again.offset, first.offset);
        assert_eq!(&again.key[..], b"k1");
    }

    #[tokio::test]
    async fn test_loose_never_redelivers() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k1", "v1"));
        broker.produce("orders", Message::new("orders", "k2", "v2"));

        let calls = Arc::new(AtomicU32::new(0));
        let (consumer, _) = build(
            &broker,
            resolve(false, vec![]),
            counting_handler(&calls, Some(HandlerError::permanent("bad"))),
        );

        let first = consumer.read_message().await.unwrap();
        assert!(consumer.handle_message(&first).await.proceed);
        let second = consumer.read_message().await.unwrap();
        assert_eq!(&second.key[..], b"k2");
    }

    #[tokio::test]
    async fn test_partial_trace_headers_still_open_a_span() {
        let broker = MemoryBroker::new();
        broker.produce(
            "orders",
            Message::new("orders", "k", "v").with_headers(vec![Header::new(B3_SAMPLED_HEADER, "1")]),
        );

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler = move |ctx: MessageContext, _payload: Bytes| {
            sink.lock().push(ctx);
            async { Ok::<(), HandlerError>(()) }
        };
        let (consumer, _) = build(&broker, resolve(true, vec![]), handler);

        let message = consumer.read_message().await.unwrap();
        assert!(consumer.handle_message(&message).await.proceed);

        let seen = seen.lock();
        let trace = seen[0].trace().unwrap();
        assert!(trace.parent_span_id.is_some());
    }
}
