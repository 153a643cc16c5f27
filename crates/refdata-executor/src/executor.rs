use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use refdata_backoff::{Classify, ErrorClass};
use refdata_bus_core::MessagingBus;
use refdata_codec::{Codec, TypeRegistry};
use refdata_stream_core::{
    PollOutcome, ProducerMessage, RebalanceEvent, StreamConsumer, StreamMessage, StreamProducer,
};
use refdata_types::{groups, topics, HEADER_CMD_ACTION, HEADER_CORR_ID, HEADER_RESPONSE_TOPIC, TopicPartition, TopicPartitionOffsets};

use crate::batch::BatchOutput;
use crate::dispatch::EntityHandler;
use crate::error::ExecutorError;
use crate::version_store::VersionStore;

/// How long a single `poll` waits for a command batch.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);
/// How long the hydration consumer waits per poll.
const HYDRATION_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Constructs the disposable, disabled-offset-commit consumer the
/// hydration engine reads the update log with. A separate trait (rather
/// than a direct dependency on a concrete stream crate) keeps this crate
/// free of any broker-specific dependency.
#[async_trait]
pub trait ConsumerFactory: Send + Sync {
    /// Build a fresh consumer bound to `group_id`, not yet subscribed or
    /// assigned to anything.
    async fn new_consumer(&self, group_id: &str) -> Box<dyn StreamConsumer>;
}

/// Core write-path loop, backed by [`VersionStore`] and the hydration
/// algorithm below.
///
/// Single-threaded over its own state by construction: every method that
/// mutates `version_store` or the in-flight transaction takes `&mut
/// self`, so no interior synchronization is needed even though the
/// collaborators it holds (`producer`, `bus`) are `Arc<dyn Trait>` for
/// sharing across tasks elsewhere in the process.
pub struct CommandExecutor<C: Codec> {
    codec: C,
    entities: TypeRegistry<Box<dyn EntityHandler<C>>>,
    cmd_topic_to_entity: HashMap<String, &'static str>,
    update_topic_to_entity: HashMap<String, &'static str>,
    command_consumer: Box<dyn StreamConsumer>,
    update_producer: Arc<dyn StreamProducer>,
    consumer_factory: Arc<dyn ConsumerFactory>,
    bus: Arc<dyn MessagingBus>,
    version_store: VersionStore,
    ready: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl<C: Codec> CommandExecutor<C> {
    /// Assemble an executor from its collaborators and the set of entity
    /// handlers it should dispatch to. `ready`/`running` are shared with
    /// the service's admin surface (readiness probe, signal handler).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        codec: C,
        handlers: Vec<Box<dyn EntityHandler<C>>>,
        command_consumer: Box<dyn StreamConsumer>,
        update_producer: Arc<dyn StreamProducer>,
        consumer_factory: Arc<dyn ConsumerFactory>,
        bus: Arc<dyn MessagingBus>,
        ready: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let mut entities = TypeRegistry::new();
        let mut cmd_topic_to_entity = HashMap::new();
        let mut update_topic_to_entity = HashMap::new();
        for handler in handlers {
            let name = handler.entity_name();
            cmd_topic_to_entity.insert(topics::command_topic(name), name);
            update_topic_to_entity.insert(topics::update_topic(name), name);
            entities.register(name, handler);
        }

        Self {
            codec,
            entities,
            cmd_topic_to_entity,
            update_topic_to_entity,
            command_consumer,
            update_producer,
            consumer_factory,
            bus,
            version_store: VersionStore::new(),
            ready,
            running,
        }
    }

    /// `true` once hydration for the current assignment has completed;
    /// read by the service's admin-surface readiness probe.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// The set of UUIDs currently tracked by this executor's VersionStore.
    pub fn tracked_entity_count(&self) -> usize {
        self.version_store.len()
    }

    /// Initialize the transactional producer and subscribe the command
    /// consumer. Must be called once before [`CommandExecutor::run`].
    pub async fn start(&mut self) -> Result<(), ExecutorError> {
        self.update_producer.init_transactions().await?;
        let topics: Vec<String> = self.cmd_topic_to_entity.keys().cloned().collect();
        self.command_consumer.subscribe(&topics).await?;
        Ok(())
    }

    /// Run the main write-path loop until `running` is flipped false.
    /// Exits at the next batch boundary; a fatal error propagates and
    /// terminates the caller's process.
    pub async fn run(&mut self) -> Result<(), ExecutorError> {
        while self.running.load(Ordering::SeqCst) {
            match self.command_consumer.poll(POLL_TIMEOUT, true).await? {
                PollOutcome::Empty => continue,
                PollOutcome::Rebalance(event) => self.handle_rebalance(event).await?,
                PollOutcome::Messages(batch) => {
                    debug!(size = batch.len(), "processing command batch");
                    self.process_batch(batch).await?;
                }
            }
        }
        Ok(())
    }

    async fn handle_rebalance(&mut self, event: RebalanceEvent) -> Result<(), ExecutorError> {
        self.ready.store(false, Ordering::SeqCst);
        self.version_store.clear();
        match event {
            RebalanceEvent::PartitionsRevoked(revoked) => {
                info!(?revoked, "partitions revoked, state cleared, not ready");
            }
            RebalanceEvent::PartitionsAssigned(assigned) => {
                info!(?assigned, "partitions assigned, hydrating");
                if !assigned.is_empty() {
                    self.hydrate(&assigned).await?;
                }
                self.ready.store(true, Ordering::SeqCst);
                info!(entities = self.version_store.len(), "hydration complete, serving");
            }
        }
        Ok(())
    }

    /// Replay the update log for the partitions co-located with `cmd_tps`
    /// from earliest offset to high-watermark, rebuilding `version_store`.
    async fn hydrate(&mut self, cmd_tps: &[TopicPartition]) -> Result<(), ExecutorError> {
        let update_tps = self.map_to_update_partitions(cmd_tps)?;

        let mut consumer = self.consumer_factory.new_consumer(groups::HYDRATION).await;
        let begin = consumer.beginning_offsets(&update_tps).await?;
        let end = consumer.end_offsets(&update_tps).await?;

        let mut targets: TopicPartitionOffsets = HashMap::new();
        for tp in &update_tps {
            let beg = begin.get(tp).copied().unwrap_or(0);
            let hw = end.get(tp).copied().unwrap_or(0);
            if hw > beg {
                trace!(?tp, target = hw - 1, "partition needs hydration");
                targets.insert(tp.clone(), hw - 1);
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let assign_list: Vec<TopicPartition> = targets.keys().cloned().collect();
        consumer.assign(&assign_list).await?;
        consumer.seek_to_beginning().await?;
        info!(partitions = targets.len(), "hydration started");

        while !targets.is_empty() && self.running.load(Ordering::SeqCst) {
            if let PollOutcome::Messages(batch) = consumer.poll(HYDRATION_POLL_TIMEOUT, true).await? {
                for msg in &batch {
                    self.process_hydration_message(msg);
                }
            }
            for tp in targets.keys().cloned().collect::<Vec<_>>() {
                let position = consumer.position(&tp).await?;
                if position > targets[&tp] {
                    targets.remove(&tp);
                }
            }
        }
        Ok(())
    }

    fn map_to_update_partitions(&self, cmd_tps: &[TopicPartition]) -> Result<Vec<TopicPartition>, ExecutorError> {
        cmd_tps
            .iter()
            .map(|(topic, p)| {
                let entity = self
                    .cmd_topic_to_entity
                    .get(topic)
                    .copied()
                    .ok_or_else(|| ExecutorError::UnknownTopic(topic.clone()))?;
                Ok((topics::update_topic(entity), *p))
            })
            .collect()
    }

    fn process_hydration_message(&mut self, msg: &StreamMessage) {
        let Some(entity) = self.update_topic_to_entity.get(&msg.topic).copied() else {
            warn!(topic = %msg.topic, "hydration message on unrecognized update topic, skipping");
            return;
        };
        let Ok(handler) = self.entities.get(entity) else {
            warn!(entity, "no handler registered for entity during hydration, skipping");
            return;
        };
        if let Err(err) = handler.process_hydration_message(&self.codec, &msg.payload, &mut self.version_store) {
            warn!(%err, offset = msg.offset, "failed to deserialize hydration message, skipping");
        }
    }

    async fn process_batch(&mut self, batch: Vec<StreamMessage>) -> Result<(), ExecutorError> {
        let mut output = BatchOutput::default();
        let mut offsets_to_commit: TopicPartitionOffsets = HashMap::new();

        let result = self.try_process_batch(&batch, &mut output, &mut offsets_to_commit).await;

        if let Err(err) = result {
            let class = err.error_class();
            error!(%err, ?class, "aborting transaction after batch processing error");
            if let Err(abort_err) = self.update_producer.abort_transaction().await {
                error!(%abort_err, "abort_transaction itself failed");
            }
            return match class {
                // The broker will redeliver this batch from the last
                // committed offsets; nothing was staged durably, so
                // looping back to poll again is exactly "retry the batch".
                ErrorClass::TransactionAbortRequired => {
                    warn!("transaction aborted, retrying batch from last committed offsets");
                    Ok(())
                }
                ErrorClass::Transient | ErrorClass::Fatal | ErrorClass::PerMessage => Err(err),
            };
        }

        self.version_store.apply(output.version_updates, output.record_updates);
        for (response, subject) in output.responses {
            match self.codec.encode(&response) {
                Ok(payload) => {
                    if let Err(err) = self.bus.publish(&subject, payload) {
                        error!(%err, subject, "failed to publish command response");
                    }
                }
                Err(err) => error!(%err, subject, "failed to encode command response"),
            }
        }
        Ok(())
    }

    async fn try_process_batch(
        &mut self,
        batch: &[StreamMessage],
        output: &mut BatchOutput,
        offsets_to_commit: &mut TopicPartitionOffsets,
    ) -> Result<(), ExecutorError> {
        self.update_producer.begin_transaction().await?;

        for msg in batch {
            trace!(topic = %msg.topic, partition = msg.partition, offset = msg.offset, "processing command message");
            if let Err(err) = self.process_command_message(msg, output).await {
                warn!(%err, topic = %msg.topic, offset = msg.offset, "routing message to DLQ");
                let dlq_topic = topics::dlq_topic(&msg.topic);
                let key = msg.key.clone().unwrap_or_else(|| "NO_KEY".to_string());
                let dlq_msg = ProducerMessage::new(dlq_topic, key, msg.payload.clone().into()).with_id(msg.offset);
                self.update_producer.send(dlq_msg).await?;
            }
            offsets_to_commit.insert((msg.topic.clone(), msg.partition), msg.offset + 1);
        }

        let group_metadata = self.command_consumer.group_metadata().await?;
        self.update_producer.send_offsets_to_transaction(offsets_to_commit, &group_metadata).await?;
        self.update_producer.commit_transaction().await?;
        Ok(())
    }

    async fn process_command_message(&self, msg: &StreamMessage, output: &mut BatchOutput) -> Result<(), ExecutorError> {
        let entity = self
            .cmd_topic_to_entity
            .get(&msg.topic)
            .copied()
            .ok_or_else(|| ExecutorError::UnknownTopic(msg.topic.clone()))?;
        let action = msg.header(HEADER_CMD_ACTION).ok_or(ExecutorError::MissingHeader(HEADER_CMD_ACTION))?;
        let corr_id_str = msg.header(HEADER_CORR_ID).ok_or(ExecutorError::MissingHeader(HEADER_CORR_ID))?;
        let corr_id = Uuid::parse_str(corr_id_str).map_err(|_| ExecutorError::InvalidCorrId(corr_id_str.to_string()))?;
        let response_topic =
            msg.header(HEADER_RESPONSE_TOPIC).ok_or(ExecutorError::MissingHeader(HEADER_RESPONSE_TOPIC))?;

        let handler = self.entities.get(entity)?;
        handler
            .process_command(
                action,
                &self.codec,
                &msg.payload,
                msg.offset,
                corr_id,
                &self.version_store,
                output,
                self.update_producer.as_ref(),
                response_topic,
            )
            .await
    }
}
