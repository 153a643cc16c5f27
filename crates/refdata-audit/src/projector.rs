use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, warn};

use refdata_backoff::{BackoffPolicy, Classify, ErrorClass};
use refdata_codec::{Codec, SharedBuffer, TypeRegistry};
use refdata_stream_core::{PollOutcome, ProducerMessage, StreamConsumer, StreamMessage, StreamProducer};
use refdata_types::topics;

use crate::dispatch::AuditEntityHandler;
use crate::error::AuditError;
use crate::store::{AuditStore, TypedRecordBytes};

/// How long a single poll waits for an update batch.
const POLL_TIMEOUT: Duration = Duration::from_secs(2);

/// Durable historical projection of the update log: buffers
/// heterogeneous update-topic messages into per-entity buckets, retries
/// bulk inserts into an [`AuditStore`] under a [`BackoffPolicy`], and
/// advances consumer offsets only once every bucket in a batch has
/// committed durably.
pub struct AuditProjector<C: Codec> {
    codec: C,
    entities: TypeRegistry<Box<dyn AuditEntityHandler<C>>>,
    update_topic_to_entity: HashMap<String, &'static str>,
    update_consumer: Box<dyn StreamConsumer>,
    dlq_producer: Arc<dyn StreamProducer>,
    store: Arc<dyn AuditStore>,
    backoff_spec: refdata_backoff::BackoffSpec,
    running: Arc<AtomicBool>,
}

impl<C: Codec> AuditProjector<C> {
    /// Assemble a projector from its collaborators. `handlers` is the set
    /// of entities this projector instance is configured to process;
    /// a deployment may run several projectors each scoped to a disjoint
    /// subset of entities.
    pub fn new(
        codec: C,
        handlers: Vec<Box<dyn AuditEntityHandler<C>>>,
        update_consumer: Box<dyn StreamConsumer>,
        dlq_producer: Arc<dyn StreamProducer>,
        store: Arc<dyn AuditStore>,
        backoff_spec: refdata_backoff::BackoffSpec,
        running: Arc<AtomicBool>,
    ) -> Self {
        let mut entities = TypeRegistry::new();
        let mut update_topic_to_entity = HashMap::new();
        for handler in handlers {
            let name = handler.entity_name();
            update_topic_to_entity.insert(topics::update_topic(name), name);
            entities.register(name, handler);
        }

        Self { codec, entities, update_topic_to_entity, update_consumer, dlq_producer, store, backoff_spec, running }
    }

    /// Subscribe the update consumer to every configured entity's update
    /// topic. Must be called once before [`AuditProjector::run`].
    pub async fn start(&mut self) -> Result<(), AuditError> {
        let topics: Vec<String> = self.update_topic_to_entity.keys().cloned().collect();
        self.update_consumer.subscribe(&topics).await?;
        Ok(())
    }

    /// Run the projection loop until `running` is flipped false.
    pub async fn run(&mut self) -> Result<(), AuditError> {
        while self.running.load(Ordering::SeqCst) {
            match self.update_consumer.poll(POLL_TIMEOUT, false).await? {
                PollOutcome::Empty => continue,
                PollOutcome::Rebalance(_) => {
                    // The projector has no partition-local state to rebuild:
                    // every message carries its own full record, so a
                    // rebalance needs no hydration step, unlike the executor.
                    continue;
                }
                PollOutcome::Messages(batch) => {
                    debug!(size = batch.len(), "processing update batch");
                    if let Err(err) = self.process_batch(batch).await {
                        let class = err.error_class();
                        match class {
                            // Offsets for this batch were never committed,
                            // so the next poll redelivers it unchanged;
                            // looping back is the retry.
                            ErrorClass::TransactionAbortRequired => {
                                warn!(%err, "retrying update batch after a transaction-abort-required error");
                            }
                            ErrorClass::Transient | ErrorClass::Fatal | ErrorClass::PerMessage => {
                                error!(%err, ?class, "audit projection loop terminating");
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn process_batch(&mut self, batch: Vec<StreamMessage>) -> Result<(), AuditError> {
        let mut buckets: HashMap<&'static str, Vec<TypedRecordBytes>> = HashMap::new();
        let mut any_dlq = false;

        for msg in &batch {
            match self.stage_message(msg) {
                Ok((entity, staged)) => buckets.entry(entity).or_default().push(staged),
                Err(err) => {
                    warn!(%err, topic = %msg.topic, offset = msg.offset, "routing update message to DLQ");
                    let dlq_topic = topics::dlq_topic(&msg.topic);
                    let key = msg.key.clone().unwrap_or_else(|| "NO_KEY".to_string());
                    let dlq_msg = ProducerMessage::new(dlq_topic, key, SharedBuffer::from(msg.payload.clone())).with_id(msg.offset);
                    self.dlq_producer.send(dlq_msg).await?;
                    any_dlq = true;
                }
            }
        }
        if any_dlq {
            self.dlq_producer.flush(Duration::from_secs(5)).await?;
        }

        for (entity, records) in buckets {
            self.insert_with_backoff(entity, records).await?;
        }

        let mut offsets = refdata_types::TopicPartitionOffsets::new();
        for msg in &batch {
            offsets.insert(msg.topic_partition(), msg.offset + 1);
        }
        self.update_consumer.commit_offsets(&offsets).await?;
        Ok(())
    }

    fn stage_message(&self, msg: &StreamMessage) -> Result<(&'static str, TypedRecordBytes), AuditError> {
        let entity = self
            .update_topic_to_entity
            .get(&msg.topic)
            .copied()
            .ok_or_else(|| AuditError::UnknownTopic(msg.topic.clone()))?;
        let handler = self.entities.get(entity)?;
        let payload = SharedBuffer::from(msg.payload.clone());
        let staged = handler.stage(&self.codec, payload)?;
        Ok((entity, staged))
    }

    async fn insert_with_backoff(&self, entity: &'static str, records: Vec<TypedRecordBytes>) -> Result<(), AuditError> {
        let mut policy = BackoffPolicy::new(self.backoff_spec);
        loop {
            debug!(entity, count = records.len(), "inserting refdata entities into the audit store");
            match self.store.insert(records.clone()).await {
                Ok(()) => return Ok(()),
                Err(source) => match policy.next_delay() {
                    Some(delay) => {
                        error!(entity, attempt = policy.attempts(), %source, "audit store insert failed, retrying");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        error!(entity, attempts = policy.attempts(), %source, "audit store insert exhausted retries, stopping projector");
                        return Err(AuditError::StoreExhausted { entity, attempts: policy.attempts(), source });
                    }
                },
            }
        }
    }
}
