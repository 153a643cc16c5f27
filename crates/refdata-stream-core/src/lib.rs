#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-stream-core** – Abstract partitioned-stream producer/consumer
//! contracts.
//!
//! Concrete broker drivers (Kafka and similar) stay out of this crate:
//! they're vendor choices behind an abstract interface. This crate is that
//! interface layer. `refdata-stream-memory` provides the in-process test
//! double that exercises it; a production deployment would add a sibling
//! crate (e.g. `refdata-stream-kafka`) implementing the same traits.
//!
//! Rebalance notifications fold into [`StreamConsumer::poll`]'s return type
//! ([`PollOutcome::Rebalance`]) rather than a synchronous broker-thread
//! callback, since hydration needs to run arbitrary async work (spawning a
//! consumer, polling, seeking) in response to one. The caller's main loop
//! reacts to a rebalance the same way it reacts to a batch of messages:
//! inline, synchronously with respect to the loop, on the same
//! timeout-driven polling cadence. That keeps hydration completing before
//! normal polling resumes without an async-from-sync-callback bridge.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use refdata_codec::SharedBuffer;
use refdata_types::{TopicPartition, TopicPartitionOffsets};

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors surfaced by stream producer/consumer operations.
///
/// Each variant maps to one of the retry classifications the write path
/// and audit projector use to decide whether to retry, abort, or give up.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A retriable error the underlying client already tried to recover
    /// from internally before giving up. Non-fatal; the caller should
    /// abort the in-flight transaction (if any) and retry the batch.
    #[error("transient stream error: {0}")]
    Transient(String),
    /// The current transaction must be aborted before any further
    /// progress is possible (e.g. a send failed mid-transaction).
    #[error("transaction abort required: {0}")]
    TransactionAbortRequired(String),
    /// A non-retriable broker error: fencing, authorization, or an
    /// unknown producer id. The caller must abort if possible, log
    /// critically, and exit.
    #[error("fatal broker error: {0}")]
    Fatal(String),
    /// `flush` did not complete within its timeout. Non-fatal.
    #[error("flush timed out after {0:?}")]
    FlushTimeout(Duration),
}

//─────────────────────────────
//  Messages
//─────────────────────────────

/// A message observed from [`StreamConsumer::poll`].
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Source topic.
    pub topic: String,
    /// Source partition.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Partition key, if present.
    pub key: Option<String>,
    /// Raw payload bytes.
    pub payload: Vec<u8>,
    /// Message headers. Absent when the caller requested header parsing
    /// be skipped for performance (`poll`'s `read_headers` flag).
    pub headers: Option<HashMap<String, String>>,
}

impl StreamMessage {
    /// This message's `(topic, partition)` pair.
    pub fn topic_partition(&self) -> TopicPartition {
        (self.topic.clone(), self.partition)
    }

    /// Look up a header value, if headers were read and the key is present.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.as_ref()?.get(key).map(String::as_str)
    }
}

/// A message to be sent via [`StreamProducer::send`].
#[derive(Debug, Clone)]
pub struct ProducerMessage {
    /// Destination topic.
    pub topic: String,
    /// Explicit destination partition. When absent, the key determines
    /// the partition, keeping an entity's commands and updates
    /// co-partitioned.
    pub partition: Option<i32>,
    /// Partition key.
    pub key: Option<String>,
    /// An id correlating this message back to the command that produced
    /// it (typically the source command's stream offset).
    pub id: Option<i64>,
    /// Payload bytes. [`SharedBuffer`] so the producer can retain the
    /// bytes past the caller's scope while batching in the background.
    pub payload: SharedBuffer,
    /// Message headers.
    pub headers: HashMap<String, String>,
}

impl ProducerMessage {
    /// Construct a message with no headers and no explicit partition.
    pub fn new(topic: impl Into<String>, key: impl Into<String>, payload: SharedBuffer) -> Self {
        Self {
            topic: topic.into(),
            partition: None,
            key: Some(key.into()),
            id: None,
            payload,
            headers: HashMap::new(),
        }
    }

    /// Attach a tracing id (typically the source command's offset).
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = Some(id);
        self
    }

    /// Attach a header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

//─────────────────────────────
//  Rebalance
//─────────────────────────────

/// A partition-ownership change observed while subscribed to a consumer
/// group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebalanceEvent {
    /// Partitions were assigned to this consumer.
    PartitionsAssigned(Vec<TopicPartition>),
    /// Partitions were revoked from this consumer.
    PartitionsRevoked(Vec<TopicPartition>),
}

/// What [`StreamConsumer::poll`] observed.
#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// No messages and no rebalance event within the timeout.
    Empty,
    /// A non-empty, strictly-increasing-per-partition batch of messages.
    Messages(Vec<StreamMessage>),
    /// A rebalance event. The caller must react before polling again.
    Rebalance(RebalanceEvent),
}

/// Opaque token binding a consumer's group membership to a producer's
/// `sendOffsetsToTransaction` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMetadata(pub String);

//─────────────────────────────
//  StreamConsumer
//─────────────────────────────

/// Subscribe/assign, poll batches, manual offset commit, rebalance
/// notification, pause/resume-free offset arithmetic used by the
/// hydration engine.
///
/// Within a single partition, `poll` returns messages in strictly
/// increasing offset order. No ordering is provided across partitions.
#[async_trait]
pub trait StreamConsumer: Send + Sync {
    /// Join a consumer group and subscribe to `topics`. Rebalance events
    /// affecting this subscription surface via [`PollOutcome::Rebalance`].
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), StreamError>;

    /// Disable group balancing and read exactly `partitions`, used by the
    /// hydration engine's dedicated, disposable consumer.
    async fn assign(&mut self, partitions: &[TopicPartition]) -> Result<(), StreamError>;

    /// Poll for the next batch of messages or rebalance event.
    ///
    /// `read_headers` may be set to `false` to skip header parsing for
    /// performance on the hot path (e.g. the audit projector, which never
    /// inspects headers).
    async fn poll(&mut self, timeout: Duration, read_headers: bool) -> Result<PollOutcome, StreamError>;

    /// Commit `offsets` (each value is the next offset to read, i.e. last
    /// processed offset + 1).
    async fn commit_offsets(&mut self, offsets: &TopicPartitionOffsets) -> Result<(), StreamError>;

    /// Seek every assigned partition to its earliest available offset.
    async fn seek_to_beginning(&mut self) -> Result<(), StreamError>;

    /// Seek every assigned partition to its latest available offset.
    async fn seek_to_end(&mut self) -> Result<(), StreamError>;

    /// Seek a specific partition to `offset`.
    async fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), StreamError>;

    /// The earliest available offset for each of `partitions`.
    async fn beginning_offsets(
        &mut self,
        partitions: &[TopicPartition],
    ) -> Result<TopicPartitionOffsets, StreamError>;

    /// The high-watermark (last committed offset + 1) for each of
    /// `partitions`.
    async fn end_offsets(
        &mut self,
        partitions: &[TopicPartition],
    ) -> Result<TopicPartitionOffsets, StreamError>;

    /// The next offset to be read for `partition`.
    async fn position(&mut self, partition: &TopicPartition) -> Result<i64, StreamError>;

    /// An opaque token describing this consumer's group membership, for
    /// coupling with [`StreamProducer::send_offsets_to_transaction`].
    async fn group_metadata(&self) -> Result<GroupMetadata, StreamError>;
}

//─────────────────────────────
//  StreamProducer
//─────────────────────────────

/// Asynchronous batched publish with an optional transactional API.
///
/// A fatal producer error aborts the in-flight transaction and must
/// propagate to terminate the caller's loop; a retriable error is
/// retried internally by the implementation and never observed here.
#[async_trait]
pub trait StreamProducer: Send + Sync {
    /// Enqueue `msg` for background batched transmission.
    async fn send(&self, msg: ProducerMessage) -> Result<(), StreamError>;

    /// Block until the local send queue drains or `timeout` elapses.
    async fn flush(&self, timeout: Duration) -> Result<(), StreamError>;

    /// Recover and fence any zombie transaction for this producer's
    /// configured transactional identity. Must be called once at
    /// startup before the first [`StreamProducer::begin_transaction`].
    async fn init_transactions(&self) -> Result<(), StreamError>;

    /// Open a transaction. Every `send` and `send_offsets_to_transaction`
    /// until the matching commit/abort is part of it.
    async fn begin_transaction(&self) -> Result<(), StreamError>;

    /// Commit the current transaction.
    async fn commit_transaction(&self) -> Result<(), StreamError>;

    /// Abort the current transaction, discarding every send and offset
    /// coupling issued since the matching `begin_transaction`.
    async fn abort_transaction(&self) -> Result<(), StreamError>;

    /// Atomically couple `offsets` (next-offset-to-read per partition)
    /// with the current transaction, using `group_metadata` obtained
    /// from the paired consumer.
    async fn send_offsets_to_transaction(
        &self,
        offsets: &TopicPartitionOffsets,
        group_metadata: &GroupMetadata,
    ) -> Result<(), StreamError>;
}
