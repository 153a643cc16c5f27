#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-stream-memory** – In-process test double for
//! [`refdata_stream_core::StreamProducer`]/[`StreamConsumer`].
//!
//! Modeled on the reference platform's `toka-store-memory::MemoryBackend`:
//! a single `Arc<Mutex<_>>`-guarded state shared by every handle cloned
//! from a [`MemoryBroker`], with no background threads. Unlike a real
//! broker, reads and writes are synchronous under the lock; the async
//! signatures in `refdata-stream-core` are honored but never actually
//! suspend except where `poll` intentionally yields briefly on an empty
//! partition so concurrent tasks get a turn to produce.
//!
//! Transactions are a staging buffer: `send` during an open transaction
//! appends to the producer's own pending list rather than the shared log,
//! and `commit_transaction` moves it over atomically under the broker
//! lock. A producer with no open transaction writes straight through,
//! covering the audit projector's plain (non-transactional) DLQ producer.
//!
//! Consumer-group rebalancing is eager, not cooperative: any membership
//! change revokes every member's current assignment and recomputes a
//! fresh round-robin assignment over the group's subscribed partitions,
//! mirroring the "stop the world, then reassign" behavior the hydration
//! engine is written against.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, trace};

use refdata_stream_core::{
    GroupMetadata, PollOutcome, ProducerMessage, RebalanceEvent, StreamConsumer, StreamError,
    StreamMessage, StreamProducer,
};
use refdata_types::{TopicPartition, TopicPartitionOffsets};

/// Number of partitions created for a topic the first time it is written
/// to or subscribed against. Fixed for the lifetime of the broker, as a
/// real deployment would fix it via broker-side topic provisioning.
const DEFAULT_PARTITIONS: i32 = 4;

#[derive(Clone)]
struct StoredMessage {
    key: Option<String>,
    payload: Vec<u8>,
    headers: HashMap<String, String>,
}

struct TopicLog {
    partitions: Vec<Vec<StoredMessage>>,
}

impl TopicLog {
    fn new(num_partitions: i32) -> Self {
        Self { partitions: (0..num_partitions).map(|_| Vec::new()).collect() }
    }

    fn num_partitions(&self) -> i32 {
        self.partitions.len() as i32
    }
}

struct GroupState {
    /// Members in join order; round-robin assignment walks this list.
    members: Vec<u64>,
    /// Union of topics any member has subscribed to.
    topics: HashSet<String>,
    assignment: HashMap<u64, Vec<TopicPartition>>,
    committed_offsets: HashMap<TopicPartition, i64>,
    pending_events: HashMap<u64, VecDeque<RebalanceEvent>>,
}

impl GroupState {
    fn new() -> Self {
        Self {
            members: Vec::new(),
            topics: HashSet::new(),
            assignment: HashMap::new(),
            committed_offsets: HashMap::new(),
            pending_events: HashMap::new(),
        }
    }
}

struct BrokerState {
    topics: HashMap<String, TopicLog>,
    groups: HashMap<String, GroupState>,
    /// Current fencing epoch per transactional id. A producer whose
    /// `init_transactions` call is not the latest for its id is a zombie:
    /// further operations return `StreamError::Fatal`.
    txn_epochs: HashMap<String, u64>,
}

impl BrokerState {
    fn new() -> Self {
        Self { topics: HashMap::new(), groups: HashMap::new(), txn_epochs: HashMap::new() }
    }

    fn topic_mut(&mut self, topic: &str) -> &mut TopicLog {
        self.topics.entry(topic.to_string()).or_insert_with(|| TopicLog::new(DEFAULT_PARTITIONS))
    }

    fn partition_for(&mut self, topic: &str, key: Option<&str>) -> i32 {
        let num_partitions = self.topic_mut(topic).num_partitions();
        match key {
            Some(k) => {
                let mut hasher = DefaultHasher::new();
                k.hash(&mut hasher);
                (hasher.finish() % num_partitions as u64) as i32
            }
            None => 0,
        }
    }

    /// Recompute a round-robin assignment for `group_id` over every
    /// partition of every subscribed topic, revoking-then-assigning for
    /// every current member.
    fn rebalance_group(&mut self, group_id: &str) {
        let group = self.groups.entry(group_id.to_string()).or_insert_with(GroupState::new);

        let mut all_partitions: Vec<TopicPartition> = Vec::new();
        for topic in &group.topics {
            if let Some(log) = self.topics.get(topic) {
                for p in 0..log.num_partitions() {
                    all_partitions.push((topic.clone(), p));
                }
            }
        }
        all_partitions.sort();

        for member in &group.members {
            if let Some(old) = group.assignment.remove(member) {
                if !old.is_empty() {
                    group
                        .pending_events
                        .entry(*member)
                        .or_default()
                        .push_back(RebalanceEvent::PartitionsRevoked(old));
                }
            }
        }

        if group.members.is_empty() {
            return;
        }
        let mut new_assignment: HashMap<u64, Vec<TopicPartition>> =
            group.members.iter().map(|m| (*m, Vec::new())).collect();
        for (i, tp) in all_partitions.into_iter().enumerate() {
            let member = group.members[i % group.members.len()];
            new_assignment.get_mut(&member).unwrap().push(tp);
        }
        for (member, assigned) in &new_assignment {
            if !assigned.is_empty() {
                group
                    .pending_events
                    .entry(*member)
                    .or_default()
                    .push_back(RebalanceEvent::PartitionsAssigned(assigned.clone()));
            }
        }
        group.assignment = new_assignment;
    }
}

/// A shared, cloneable handle to an in-process partitioned-log broker.
///
/// Clone it freely; every clone observes the same topics, groups and
/// offsets. Construct producers and consumers against the same
/// `MemoryBroker` to exercise a write path end to end.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
    next_consumer_id: Arc<AtomicU64>,
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBroker {
    /// Create a fresh, empty broker.
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(BrokerState::new())), next_consumer_id: Arc::new(AtomicU64::new(1)) }
    }

    /// Construct a consumer bound to this broker under consumer group
    /// `group_id`. The consumer is inert until `subscribe` or `assign` is
    /// called.
    pub fn consumer(&self, group_id: impl Into<String>) -> MemoryStreamConsumer {
        let id = self.next_consumer_id.fetch_add(1, Ordering::SeqCst);
        MemoryStreamConsumer {
            broker: self.clone(),
            id,
            group_id: group_id.into(),
            mode: ConsumerMode::Unbound,
            positions: HashMap::new(),
        }
    }

    /// Construct a producer bound to this broker. `transactional_id` is
    /// only consulted if [`StreamProducer::init_transactions`] is called;
    /// a producer that never calls it behaves as a plain, non-transactional
    /// auto-commit producer (the audit projector's DLQ producer).
    pub fn producer(&self, transactional_id: impl Into<String>) -> MemoryStreamProducer {
        MemoryStreamProducer {
            broker: self.clone(),
            transactional_id: transactional_id.into(),
            epoch: Mutex::new(None),
            txn: Mutex::new(None),
        }
    }

    /// Total number of messages appended to `topic` across every
    /// partition. Test helper for assertions.
    pub async fn topic_len(&self, topic: &str) -> usize {
        let state = self.state.lock().await;
        state.topics.get(topic).map(|t| t.partitions.iter().map(Vec::len).sum()).unwrap_or(0)
    }
}

#[derive(Clone, PartialEq, Eq)]
enum ConsumerMode {
    Unbound,
    Group,
    Manual,
}

/// An in-process, broker-bound [`StreamConsumer`].
pub struct MemoryStreamConsumer {
    broker: MemoryBroker,
    id: u64,
    group_id: String,
    mode: ConsumerMode,
    /// Next offset to read, per assigned partition.
    positions: HashMap<TopicPartition, i64>,
}

impl MemoryStreamConsumer {
    fn assigned_partitions(&self) -> Vec<TopicPartition> {
        self.positions.keys().cloned().collect()
    }

    /// Leave this consumer's group, triggering a rebalance among the
    /// remaining members. No-op for a manually assigned or unbound
    /// consumer. Exposed for tests simulating instance crash/restart;
    /// not part of the `StreamConsumer` trait since group departure is a
    /// broker-session concept a trait-level API need not expose.
    pub async fn leave(&mut self) {
        if self.mode != ConsumerMode::Group {
            return;
        }
        let mut state = self.broker.state.lock().await;
        if let Some(group) = state.groups.get_mut(&self.group_id) {
            group.members.retain(|m| *m != self.id);
            group.pending_events.remove(&self.id);
        }
        state.rebalance_group(&self.group_id);
        self.positions.clear();
        self.mode = ConsumerMode::Unbound;
    }
}

#[async_trait]
impl StreamConsumer for MemoryStreamConsumer {
    async fn subscribe(&mut self, topics: &[String]) -> Result<(), StreamError> {
        let mut state = self.broker.state.lock().await;
        for topic in topics {
            state.topic_mut(topic);
        }
        let group = state.groups.entry(self.group_id.clone()).or_insert_with(GroupState::new);
        group.topics.extend(topics.iter().cloned());
        if !group.members.contains(&self.id) {
            group.members.push(self.id);
        }
        state.rebalance_group(&self.group_id);
        self.mode = ConsumerMode::Group;
        debug!(consumer_id = self.id, group = %self.group_id, ?topics, "subscribed to group");
        Ok(())
    }

    async fn assign(&mut self, partitions: &[TopicPartition]) -> Result<(), StreamError> {
        let mut state = self.broker.state.lock().await;
        for (topic, _) in partitions {
            state.topic_mut(topic);
        }
        for tp in partitions {
            self.positions.entry(tp.clone()).or_insert(0);
        }
        self.mode = ConsumerMode::Manual;
        debug!(consumer_id = self.id, ?partitions, "manually assigned partitions");
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration, read_headers: bool) -> Result<PollOutcome, StreamError> {
        if self.mode == ConsumerMode::Group {
            let mut state = self.broker.state.lock().await;
            if let Some(group) = state.groups.get_mut(&self.group_id) {
                if let Some(events) = group.pending_events.get_mut(&self.id) {
                    if let Some(event) = events.pop_front() {
                        match &event {
                            RebalanceEvent::PartitionsRevoked(revoked) => {
                                for tp in revoked {
                                    self.positions.remove(tp);
                                }
                            }
                            RebalanceEvent::PartitionsAssigned(assigned) => {
                                let committed = group.committed_offsets.clone();
                                for tp in assigned {
                                    let start = committed.get(tp).copied().unwrap_or(0);
                                    self.positions.insert(tp.clone(), start);
                                }
                            }
                        }
                        return Ok(PollOutcome::Rebalance(event));
                    }
                }
            }
        }

        let mut messages = Vec::new();
        {
            let state = self.broker.state.lock().await;
            let mut partitions: Vec<TopicPartition> = self.positions.keys().cloned().collect();
            partitions.sort();
            for (topic, partition) in partitions {
                let Some(log) = state.topics.get(&topic) else { continue };
                let Some(entries) = log.partitions.get(partition as usize) else { continue };
                let next = self.positions.get(&(topic.clone(), partition)).copied().unwrap_or(0);
                for (offset, stored) in entries.iter().enumerate().skip(next as usize) {
                    messages.push(StreamMessage {
                        topic: topic.clone(),
                        partition,
                        offset: offset as i64,
                        key: stored.key.clone(),
                        payload: stored.payload.clone(),
                        headers: if read_headers { Some(stored.headers.clone()) } else { None },
                    });
                }
                if let Some(last) = messages.last() {
                    self.positions.insert((topic.clone(), partition), last.offset + 1);
                }
            }
        }

        if messages.is_empty() {
            tokio::time::sleep(timeout.min(Duration::from_millis(5))).await;
            trace!(consumer_id = self.id, "poll returned no messages");
            Ok(PollOutcome::Empty)
        } else {
            Ok(PollOutcome::Messages(messages))
        }
    }

    async fn commit_offsets(&mut self, offsets: &TopicPartitionOffsets) -> Result<(), StreamError> {
        if self.mode != ConsumerMode::Group {
            return Ok(());
        }
        let mut state = self.broker.state.lock().await;
        let group = state.groups.entry(self.group_id.clone()).or_insert_with(GroupState::new);
        for (tp, offset) in offsets {
            group.committed_offsets.insert(tp.clone(), *offset);
        }
        Ok(())
    }

    async fn seek_to_beginning(&mut self) -> Result<(), StreamError> {
        for tp in self.assigned_partitions() {
            self.positions.insert(tp, 0);
        }
        Ok(())
    }

    async fn seek_to_end(&mut self) -> Result<(), StreamError> {
        let ends = {
            let state = self.broker.state.lock().await;
            self.assigned_partitions()
                .into_iter()
                .map(|(topic, partition)| {
                    let len = state
                        .topics
                        .get(&topic)
                        .and_then(|t| t.partitions.get(partition as usize))
                        .map(Vec::len)
                        .unwrap_or(0) as i64;
                    ((topic, partition), len)
                })
                .collect::<Vec<_>>()
        };
        for (tp, end) in ends {
            self.positions.insert(tp, end);
        }
        Ok(())
    }

    async fn seek(&mut self, partition: &TopicPartition, offset: i64) -> Result<(), StreamError> {
        self.positions.insert(partition.clone(), offset);
        Ok(())
    }

    async fn beginning_offsets(
        &mut self,
        partitions: &[TopicPartition],
    ) -> Result<TopicPartitionOffsets, StreamError> {
        Ok(partitions.iter().map(|tp| (tp.clone(), 0)).collect())
    }

    async fn end_offsets(
        &mut self,
        partitions: &[TopicPartition],
    ) -> Result<TopicPartitionOffsets, StreamError> {
        let state = self.broker.state.lock().await;
        Ok(partitions
            .iter()
            .map(|(topic, partition)| {
                let len = state
                    .topics
                    .get(topic)
                    .and_then(|t| t.partitions.get(*partition as usize))
                    .map(Vec::len)
                    .unwrap_or(0) as i64;
                ((topic.clone(), *partition), len)
            })
            .collect())
    }

    async fn position(&mut self, partition: &TopicPartition) -> Result<i64, StreamError> {
        Ok(self.positions.get(partition).copied().unwrap_or(0))
    }

    async fn group_metadata(&self) -> Result<GroupMetadata, StreamError> {
        Ok(GroupMetadata(self.group_id.clone()))
    }
}

struct PendingTransaction {
    sends: Vec<(String, i32, StoredMessage)>,
    offsets: Option<(String, TopicPartitionOffsets)>,
}

/// An in-process, broker-bound [`StreamProducer`].
pub struct MemoryStreamProducer {
    broker: MemoryBroker,
    transactional_id: String,
    /// `Some` once `init_transactions` has been called; holds this
    /// producer's fencing epoch.
    epoch: Mutex<Option<u64>>,
    txn: Mutex<Option<PendingTransaction>>,
}

impl MemoryStreamProducer {
    async fn check_not_fenced(&self) -> Result<(), StreamError> {
        let Some(my_epoch) = *self.epoch.lock().await else { return Ok(()) };
        let state = self.broker.state.lock().await;
        match state.txn_epochs.get(&self.transactional_id) {
            Some(current) if *current == my_epoch => Ok(()),
            _ => Err(StreamError::Fatal(format!(
                "producer for transactional id '{}' was fenced by a newer instance",
                self.transactional_id
            ))),
        }
    }
}

#[async_trait]
impl StreamProducer for MemoryStreamProducer {
    async fn send(&self, msg: ProducerMessage) -> Result<(), StreamError> {
        self.check_not_fenced().await?;
        let stored = StoredMessage {
            key: msg.key.clone(),
            payload: msg.payload.to_vec(),
            headers: msg.headers.clone(),
        };

        let mut txn = self.txn.lock().await;
        if let Some(pending) = txn.as_mut() {
            let partition = {
                let mut state = self.broker.state.lock().await;
                msg.partition.unwrap_or_else(|| state.partition_for(&msg.topic, msg.key.as_deref()))
            };
            pending.sends.push((msg.topic, partition, stored));
            return Ok(());
        }
        drop(txn);

        let mut state = self.broker.state.lock().await;
        let partition = msg.partition.unwrap_or_else(|| state.partition_for(&msg.topic, msg.key.as_deref()));
        state.topic_mut(&msg.topic).partitions[partition as usize].push(stored);
        Ok(())
    }

    async fn flush(&self, _timeout: Duration) -> Result<(), StreamError> {
        Ok(())
    }

    async fn init_transactions(&self) -> Result<(), StreamError> {
        let mut state = self.broker.state.lock().await;
        let epoch = state.txn_epochs.entry(self.transactional_id.clone()).or_insert(0);
        *epoch += 1;
        let my_epoch = *epoch;
        drop(state);
        *self.epoch.lock().await = Some(my_epoch);
        debug!(transactional_id = %self.transactional_id, epoch = my_epoch, "initialized transactions");
        Ok(())
    }

    async fn begin_transaction(&self) -> Result<(), StreamError> {
        self.check_not_fenced().await?;
        let mut txn = self.txn.lock().await;
        if txn.is_some() {
            return Err(StreamError::Fatal("transaction already in progress".into()));
        }
        *txn = Some(PendingTransaction { sends: Vec::new(), offsets: None });
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), StreamError> {
        self.check_not_fenced().await?;
        let pending = self.txn.lock().await.take().ok_or_else(|| {
            StreamError::Fatal("commit_transaction called with no open transaction".into())
        })?;

        let mut state = self.broker.state.lock().await;
        for (topic, partition, stored) in pending.sends {
            state.topic_mut(&topic).partitions[partition as usize].push(stored);
        }
        if let Some((group_id, offsets)) = pending.offsets {
            let group = state.groups.entry(group_id).or_insert_with(GroupState::new);
            for (tp, offset) in offsets {
                group.committed_offsets.insert(tp, offset);
            }
        }
        Ok(())
    }

    async fn abort_transaction(&self) -> Result<(), StreamError> {
        let mut txn = self.txn.lock().await;
        if txn.take().is_none() {
            return Err(StreamError::Fatal("abort_transaction called with no open transaction".into()));
        }
        Ok(())
    }

    async fn send_offsets_to_transaction(
        &self,
        offsets: &TopicPartitionOffsets,
        group_metadata: &GroupMetadata,
    ) -> Result<(), StreamError> {
        self.check_not_fenced().await?;
        let mut txn = self.txn.lock().await;
        let pending = txn
            .as_mut()
            .ok_or_else(|| StreamError::Fatal("send_offsets_to_transaction outside a transaction".into()))?;
        pending.offsets = Some((group_metadata.0.clone(), offsets.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use refdata_codec::SharedBuffer;

    fn payload(bytes: &[u8]) -> SharedBuffer {
        Arc::from(bytes.to_vec().into_boxed_slice())
    }

    #[tokio::test]
    async fn send_without_transaction_is_immediately_visible() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("p1");
        producer.send(ProducerMessage::new("t1", "k1", payload(b"hello"))).await.unwrap();
        assert_eq!(broker.topic_len("t1").await, 1);
    }

    #[tokio::test]
    async fn send_inside_transaction_is_invisible_until_commit() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("p1");
        producer.init_transactions().await.unwrap();
        producer.begin_transaction().await.unwrap();
        producer.send(ProducerMessage::new("t1", "k1", payload(b"hello"))).await.unwrap();
        assert_eq!(broker.topic_len("t1").await, 0);
        producer.commit_transaction().await.unwrap();
        assert_eq!(broker.topic_len("t1").await, 1);
    }

    #[tokio::test]
    async fn abort_discards_staged_sends() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("p1");
        producer.init_transactions().await.unwrap();
        producer.begin_transaction().await.unwrap();
        producer.send(ProducerMessage::new("t1", "k1", payload(b"hello"))).await.unwrap();
        producer.abort_transaction().await.unwrap();
        assert_eq!(broker.topic_len("t1").await, 0);
    }

    #[tokio::test]
    async fn second_init_transactions_fences_the_first_producer() {
        let broker = MemoryBroker::new();
        let producer_a = broker.producer("shared-id");
        producer_a.init_transactions().await.unwrap();
        let producer_b = broker.producer("shared-id");
        producer_b.init_transactions().await.unwrap();

        let err = producer_a.begin_transaction().await.unwrap_err();
        assert!(matches!(err, StreamError::Fatal(_)));
    }

    #[tokio::test]
    async fn consumer_reads_back_what_producer_sent() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("p1");
        producer.send(ProducerMessage::new("t1", "k1", payload(b"one"))).await.unwrap();
        producer.send(ProducerMessage::new("t1", "k1", payload(b"two"))).await.unwrap();

        let mut consumer = broker.consumer("g1");
        consumer.subscribe(&["t1".to_string()]).await.unwrap();
        // First poll observes the initial partition assignment rebalance.
        let first = consumer.poll(Duration::from_millis(10), true).await.unwrap();
        assert!(matches!(first, PollOutcome::Rebalance(RebalanceEvent::PartitionsAssigned(_))));

        let mut seen = Vec::new();
        for _ in 0..10 {
            if let PollOutcome::Messages(batch) = consumer.poll(Duration::from_millis(10), true).await.unwrap() {
                seen.extend(batch);
            }
            if seen.len() == 2 {
                break;
            }
        }
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].payload, b"one");
        assert_eq!(seen[1].payload, b"two");
    }

    #[tokio::test]
    async fn joining_a_group_rebalances_existing_members() {
        let broker = MemoryBroker::new();
        broker.producer("p1").send(ProducerMessage::new("t1", "k1", payload(b"x"))).await.unwrap();

        let mut c1 = broker.consumer("g1");
        c1.subscribe(&["t1".to_string()]).await.unwrap();
        let outcome = c1.poll(Duration::from_millis(10), true).await.unwrap();
        let PollOutcome::Rebalance(RebalanceEvent::PartitionsAssigned(first_assignment)) = outcome else {
            panic!("expected initial assignment");
        };
        assert_eq!(first_assignment.len(), 4);

        let mut c2 = broker.consumer("g1");
        c2.subscribe(&["t1".to_string()]).await.unwrap();

        let revoke = c1.poll(Duration::from_millis(10), true).await.unwrap();
        assert!(matches!(revoke, PollOutcome::Rebalance(RebalanceEvent::PartitionsRevoked(_))));
        let reassign = c1.poll(Duration::from_millis(10), true).await.unwrap();
        let PollOutcome::Rebalance(RebalanceEvent::PartitionsAssigned(second_assignment)) = reassign else {
            panic!("expected reassignment after rebalance");
        };
        assert_eq!(second_assignment.len(), 2);
    }

    #[tokio::test]
    async fn manual_assignment_skips_group_rebalancing() {
        let broker = MemoryBroker::new();
        broker.producer("p1").send(ProducerMessage::new("t1", "k1", payload(b"x"))).await.unwrap();

        let mut consumer = broker.consumer("unused-group");
        consumer.assign(&[("t1".to_string(), 0)]).await.unwrap();
        let outcome = consumer.poll(Duration::from_millis(10), true).await.unwrap();
        assert!(matches!(outcome, PollOutcome::Messages(_) | PollOutcome::Empty));
    }

    #[tokio::test]
    async fn end_offsets_reflect_produced_messages() {
        let broker = MemoryBroker::new();
        let producer = broker.producer("p1");
        producer.send(ProducerMessage::new("t1", "fixed-key", payload(b"a"))).await.unwrap();
        producer.send(ProducerMessage::new("t1", "fixed-key", payload(b"b"))).await.unwrap();

        let mut consumer = broker.consumer("g1");
        consumer.assign(&[("t1".to_string(), 0), ("t1".to_string(), 1), ("t1".to_string(), 2), ("t1".to_string(), 3)]).await.unwrap();
        let ends = consumer
            .end_offsets(&[("t1".to_string(), 0), ("t1".to_string(), 1), ("t1".to_string(), 2), ("t1".to_string(), 3)])
            .await
            .unwrap();
        let total: i64 = ends.iter().map(|(_, o)| *o).sum();
        assert_eq!(total, 2);
    }
}
