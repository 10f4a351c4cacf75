//! In-memory broker backend
//!
//! A single-partition-per-topic broker living inside the process. Every
//! consumer group has one shared cursor (competing readers) and a committed
//! offset; a group whose readers all went away resumes from its committed
//! offset. Faults can be injected per operation and call statistics are
//! kept, which makes this the backend of choice for local development and
//! for the test suites.

use crate::{
    broker::{CommitMode, Connection, Connector, Reader, ReaderConfig, TopicConfig, Writer, WriterConfig},
    error::{BrokerError, BrokerResult},
    message::Message,
    types::{Offset, PartitionId},
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
};
use tokio::sync::Notify;

/// Remaining injected failures per operation.
#[derive(Debug, Default, Clone)]
struct FaultPlan {
    reads: usize,
    fetches: usize,
    commits: usize,
    writes: usize,
    probes: usize,
    connection_closes: usize,
    refuse_dials: bool,
}

#[derive(Debug, Default)]
struct GroupCursor {
    next: i64,
    committed: i64,
    active_readers: usize,
}

#[derive(Debug, Default)]
struct TopicLog {
    messages: Vec<Message>,
    groups: HashMap<String, GroupCursor>,
    config: Option<TopicConfig>,
}

/// One successful commit as seen by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub topic: String,
    pub group_id: String,
    pub offset: Offset,
    pub key: bytes::Bytes,
}

/// Call counters of the in-memory broker.
#[derive(Debug, Default)]
struct Counters {
    dials: AtomicU64,
    probes: AtomicU64,
    reads: AtomicU64,
    fetches: AtomicU64,
    commit_calls: AtomicU64,
    writes: AtomicU64,
    readers_created: AtomicU64,
    reader_closes: AtomicU64,
    writers_created: AtomicU64,
    writer_closes: AtomicU64,
    connection_closes: AtomicU64,
}

/// Snapshot of the broker call counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBrokerStats {
    pub dials: u64,
    pub probes: u64,
    pub reads: u64,
    pub fetches: u64,
    pub commit_calls: u64,
    pub writes: u64,
    pub readers_created: u64,
    pub reader_closes: u64,
    pub writers_created: u64,
    pub writer_closes: u64,
    pub connection_closes: u64,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, TopicLog>>,
    faults: Mutex<FaultPlan>,
    commit_log: Mutex<Vec<CommitRecord>>,
    counters: Counters,
    notify: Notify,
}

impl BrokerState {
    fn take_fault(&self, select: impl FnOnce(&mut FaultPlan) -> &mut usize) -> bool {
        let mut faults = self.faults.lock();
        let remaining = select(&mut faults);
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }

    fn append(&self, topic: &str, mut message: Message) -> Offset {
        let offset = {
            let mut topics = self.topics.lock();
            let log = topics.entry(topic.to_string()).or_default();
            let offset = Offset::new(log.messages.len() as i64);
            message.topic = topic.to_string();
            message.partition = PartitionId::new(0);
            message.offset = offset;
            log.messages.push(message);
            offset
        };
        self.notify.notify_waiters();
        offset
    }
}

/// In-memory broker. Cheap to clone; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    /// Create an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` `read_message` calls with a network error.
    pub fn fail_next_reads(&self, n: usize) {
        self.state.faults.lock().reads = n;
    }

    /// Fail the next `n` `fetch_message` calls with a network error.
    pub fn fail_next_fetches(&self, n: usize) {
        self.state.faults.lock().fetches = n;
    }

    /// Fail the next `n` `commit_messages` calls with a network error.
    pub fn fail_next_commits(&self, n: usize) {
        self.state.faults.lock().commits = n;
    }

    /// Fail the next `n` send attempts.
    pub fn fail_next_writes(&self, n: usize) {
        self.state.faults.lock().writes = n;
    }

    /// Fail the next `n` liveness probes.
    pub fn fail_next_probes(&self, n: usize) {
        self.state.faults.lock().probes = n;
    }

    /// Fail the next `n` connection closes. The connection is closed anyway.
    pub fn fail_next_connection_closes(&self, n: usize) {
        self.state.faults.lock().connection_closes = n;
    }

    /// Refuse (or accept again) new dials.
    pub fn refuse_dials(&self, refuse: bool) {
        self.state.faults.lock().refuse_dials = refuse;
    }

    /// Append a message directly, bypassing writers.
    pub fn produce(&self, topic: &str, message: Message) -> Offset {
        self.state.append(topic, message)
    }

    /// All messages stored for `topic`.
    #[must_use]
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.state
            .topics
            .lock()
            .get(topic)
            .map(|log| log.messages.clone())
            .unwrap_or_default()
    }

    /// Committed offset of `group_id` on `topic` (the next offset to consume).
    #[must_use]
    pub fn committed_offset(&self, topic: &str, group_id: &str) -> Option<Offset> {
        self.state
            .topics
            .lock()
            .get(topic)
            .and_then(|log| log.groups.get(group_id))
            .map(|cursor| Offset::new(cursor.committed))
    }

    /// Creation config of `topic`, if it was created through a connection.
    #[must_use]
    pub fn topic_config(&self, topic: &str) -> Option<TopicConfig> {
        self.state.topics.lock().get(topic).and_then(|log| log.config.clone())
    }

    /// Every commit accepted so far.
    #[must_use]
    pub fn commit_log(&self) -> Vec<CommitRecord> {
        self.state.commit_log.lock().clone()
    }

    /// Call counters.
    #[must_use]
    pub fn stats(&self) -> MemoryBrokerStats {
        let c = &self.state.counters;
        MemoryBrokerStats {
            dials: c.dials.load(Ordering::Relaxed),
            probes: c.probes.load(Ordering::Relaxed),
            reads: c.reads.load(Ordering::Relaxed),
            fetches: c.fetches.load(Ordering::Relaxed),
            commit_calls: c.commit_calls.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            readers_created: c.readers_created.load(Ordering::Relaxed),
            reader_closes: c.reader_closes.load(Ordering::Relaxed),
            writers_created: c.writers_created.load(Ordering::Relaxed),
            writer_closes: c.writer_closes.load(Ordering::Relaxed),
            connection_closes: c.connection_closes.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl Connector for MemoryBroker {
    async fn dial(&self, address: &str) -> BrokerResult<Arc<dyn Connection>> {
        self.state.counters.dials.fetch_add(1, Ordering::Relaxed);
        if self.state.faults.lock().refuse_dials {
            return Err(BrokerError::network(format!("dial {address}: connection refused")));
        }
        Ok(Arc::new(MemoryConnection {
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }

    fn reader(&self, config: ReaderConfig) -> BrokerResult<Arc<dyn Reader>> {
        {
            let mut topics = self.state.topics.lock();
            let cursor = topics
                .entry(config.topic.clone())
                .or_default()
                .groups
                .entry(config.group_id.clone())
                .or_default();
            if cursor.active_readers == 0 {
                // a new group session resumes from the committed offset
                cursor.next = cursor.committed;
            }
            cursor.active_readers += 1;
        }
        self.state.counters.readers_created.fetch_add(1, Ordering::Relaxed);

        Ok(Arc::new(MemoryReader {
            state: Arc::clone(&self.state),
            topic: config.topic,
            group_id: config.group_id,
            commit_mode: config.commit_mode,
            closed: AtomicBool::new(false),
        }))
    }

    fn writer(&self, config: WriterConfig) -> BrokerResult<Arc<dyn Writer>> {
        self.state.counters.writers_created.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryWriter {
            state: Arc::clone(&self.state),
            topic: config.topic,
            max_attempts: config.max_attempts.max(1),
            closed: AtomicBool::new(false),
        }))
    }
}

struct MemoryConnection {
    state: Arc<BrokerState>,
    closed: AtomicBool,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn api_versions(&self) -> BrokerResult<()> {
        self.state.counters.probes.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        if self.state.take_fault(|f| &mut f.probes) {
            return Err(BrokerError::network("injected probe failure"));
        }
        Ok(())
    }

    async fn create_topics(&self, topics: &[TopicConfig]) -> BrokerResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        let mut logs = self.state.topics.lock();
        for topic in topics {
            let log = logs.entry(topic.name.clone()).or_default();
            if log.config.is_some() {
                return Err(BrokerError::TopicAlreadyExists {
                    topic: topic.name.clone(),
                });
            }
            log.config = Some(topic.clone());
        }
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.state.counters.connection_closes.fetch_add(1, Ordering::Relaxed);
        }
        if self.state.take_fault(|f| &mut f.connection_closes) {
            return Err(BrokerError::network("injected close failure"));
        }
        Ok(())
    }
}

struct MemoryReader {
    state: Arc<BrokerState>,
    topic: String,
    group_id: String,
    commit_mode: CommitMode,
    closed: AtomicBool,
}

impl MemoryReader {
    /// Wait for the next message of the group cursor.
    async fn next_message(&self, advance_commit: bool) -> BrokerResult<Message> {
        loop {
            let notified = self.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.closed.load(Ordering::Acquire) {
                return Err(BrokerError::Closed);
            }

            {
                let mut topics = self.state.topics.lock();
                let log = topics.entry(self.topic.clone()).or_default();
                let available = log.messages.len() as i64;
                let cursor = log.groups.entry(self.group_id.clone()).or_default();
                if cursor.next < available {
                    let index = cursor.next as usize;
                    cursor.next += 1;
                    if advance_commit {
                        cursor.committed = cursor.committed.max(cursor.next);
                    }
                    return Ok(log.messages[index].clone());
                }
            }

            notified.await;
        }
    }
}

#[async_trait]
impl Reader for MemoryReader {
    async fn read_message(&self) -> BrokerResult<Message> {
        self.state.counters.reads.fetch_add(1, Ordering::Relaxed);
        if self.state.take_fault(|f| &mut f.reads) {
            return Err(BrokerError::network("injected read failure"));
        }
        self.next_message(true).await
    }

    async fn fetch_message(&self) -> BrokerResult<Message> {
        self.state.counters.fetches.fetch_add(1, Ordering::Relaxed);
        if self.state.take_fault(|f| &mut f.fetches) {
            return Err(BrokerError::network("injected fetch failure"));
        }
        self.next_message(self.commit_mode == CommitMode::Auto).await
    }

    async fn commit_messages(&self, messages: &[Message]) -> BrokerResult<()> {
        self.state.counters.commit_calls.fetch_add(1, Ordering::Relaxed);
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }
        if self.state.take_fault(|f| &mut f.commits) {
            return Err(BrokerError::network("injected commit failure"));
        }

        let mut topics = self.state.topics.lock();
        let log = topics.entry(self.topic.clone()).or_default();
        let cursor = log.groups.entry(self.group_id.clone()).or_default();
        let mut commit_log = self.state.commit_log.lock();
        for message in messages {
            cursor.committed = cursor.committed.max(message.offset.next().value());
            commit_log.push(CommitRecord {
                topic: self.topic.clone(),
                group_id: self.group_id.clone(),
                offset: message.offset,
                key: message.key.clone(),
            });
        }
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.state.counters.reader_closes.fetch_add(1, Ordering::Relaxed);
        {
            let mut topics = self.state.topics.lock();
            if let Some(cursor) = topics
                .get_mut(&self.topic)
                .and_then(|log| log.groups.get_mut(&self.group_id))
            {
                cursor.active_readers = cursor.active_readers.saturating_sub(1);
            }
        }
        self.state.notify.notify_waiters();
        Ok(())
    }
}

struct MemoryWriter {
    state: Arc<BrokerState>,
    topic: String,
    max_attempts: u32,
    closed: AtomicBool,
}

#[async_trait]
impl Writer for MemoryWriter {
    async fn write_messages(&self, messages: Vec<Message>) -> BrokerResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::Closed);
        }

        // the writer retries failed sends internally, up to max_attempts
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.state.counters.writes.fetch_add(1, Ordering::Relaxed);
            if !self.state.take_fault(|f| &mut f.writes) {
                break;
            }
            if attempt >= self.max_attempts {
                return Err(BrokerError::network("injected write failure"));
            }
        }

        for message in messages {
            self.state.append(&self.topic, message);
        }
        Ok(())
    }

    async fn close(&self) -> BrokerResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.state.counters.writer_closes.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reader_config(topic: &str, group: &str, commit_mode: CommitMode) -> ReaderConfig {
        ReaderConfig {
            brokers: vec!["memory:9092".to_string()],
            topic: topic.to_string(),
            group_id: group.to_string(),
            max_bytes: 1_000_000,
            max_attempts: 10,
            heartbeat_interval: Duration::from_secs(3),
            rebalance_timeout: Duration::from_secs(60),
            commit_mode,
        }
    }

    #[tokio::test]
    async fn test_read_message_advances_committed_offset() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k1", "v1"));

        let reader = broker.reader(reader_config("orders", "g", CommitMode::Auto)).unwrap();
        let msg = reader.read_message().await.unwrap();

        assert_eq!(&msg.value[..], b"v1");
        assert_eq!(broker.committed_offset("orders", "g"), Some(Offset::new(1)));
    }

    #[tokio::test]
    async fn test_fetch_requires_explicit_commit() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k1", "v1"));

        let reader = broker.reader(reader_config("orders", "g", CommitMode::Explicit)).unwrap();
        let msg = reader.fetch_message().await.unwrap();
        assert_eq!(broker.committed_offset("orders", "g"), Some(Offset::new(0)));

        reader.commit_messages(&[msg]).await.unwrap();
        assert_eq!(broker.committed_offset("orders", "g"), Some(Offset::new(1)));
        assert_eq!(broker.commit_log().len(), 1);
    }

    #[tokio::test]
    async fn test_uncommitted_message_is_redelivered_to_new_session() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k1", "v1"));

        let first = broker.reader(reader_config("orders", "g", CommitMode::Explicit)).unwrap();
        first.fetch_message().await.unwrap();
        first.close().await.unwrap();

        let second = broker.reader(reader_config("orders", "g", CommitMode::Explicit)).unwrap();
        let again = second.fetch_message().await.unwrap();
        assert_eq!(again.offset, Offset::new(0));
    }

    #[tokio::test]
    async fn test_blocked_read_wakes_on_produce_and_close() {
        let broker = MemoryBroker::new();
        let reader = broker.reader(reader_config("orders", "g", CommitMode::Auto)).unwrap();

        let pending = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.read_message().await })
        };
        tokio::task::yield_now().await;
        broker.produce("orders", Message::new("orders", "k", "late"));
        assert_eq!(&pending.await.unwrap().unwrap().value[..], b"late");

        let blocked = {
            let reader = Arc::clone(&reader);
            tokio::spawn(async move { reader.read_message().await })
        };
        tokio::task::yield_now().await;
        reader.close().await.unwrap();
        assert_eq!(blocked.await.unwrap(), Err(BrokerError::Closed));
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed() {
        let broker = MemoryBroker::new();
        broker.produce("orders", Message::new("orders", "k", "v"));
        broker.fail_next_reads(2);

        let reader = broker.reader(reader_config("orders", "g", CommitMode::Auto)).unwrap();
        assert!(reader.read_message().await.is_err());
        assert!(reader.read_message().await.is_err());
        assert!(reader.read_message().await.is_ok());
        assert_eq!(broker.stats().reads, 3);
    }

    #[tokio::test]
    async fn test_writer_retries_within_max_attempts() {
        let broker = MemoryBroker::new();
        broker.fail_next_writes(3);

        let bounded = broker
            .writer(WriterConfig {
                brokers: vec![],
                topic: "t".to_string(),
                max_attempts: 2,
            })
            .unwrap();
        assert!(bounded.write_messages(vec![Message::new("t", "k", "v")]).await.is_err());

        let unbounded = broker.writer(WriterConfig::unbounded(vec![], "t")).unwrap();
        unbounded.write_messages(vec![Message::new("t", "k", "v")]).await.unwrap();
        assert_eq!(broker.messages("t").len(), 1);
    }

    #[tokio::test]
    async fn test_create_existing_topic_is_reported() {
        let broker = MemoryBroker::new();
        let conn = broker.dial("memory:9092").await.unwrap();
        let cfg = TopicConfig::new("orders", 3, 1);

        conn.create_topics(&[cfg.clone()]).await.unwrap();
        assert!(matches!(
            conn.create_topics(&[cfg]).await,
            Err(BrokerError::TopicAlreadyExists { .. })
        ));
        assert_eq!(broker.topic_config("orders").unwrap().partitions, 3);
    }
}
