use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use refdata_codec::Codec;
use refdata_entities::Entity;
use refdata_stream_core::{ProducerMessage, StreamProducer};
use refdata_types::{cmd_action, topics, CommandResponse, CommandStatus, Deactivate, Record, RecordHeader, Upsert};

use crate::batch::{current_version, BatchOutput};
use crate::error::ExecutorError;
use crate::version_store::VersionStore;

/// A tagged-variant dispatch-table entry: one per registered entity type,
/// resolving a runtime `(entityName, action)` pair to a statically typed
/// processing path without a global type registry.
#[async_trait]
pub trait EntityHandler<C: Codec>: Send + Sync {
    /// This handler's entity name (matches its `Entity::NAME`).
    fn entity_name(&self) -> &'static str;

    /// Process one command-topic message already known to belong to this
    /// entity. `action` is the raw `ARQ_CmdAction` header value.
    #[allow(clippy::too_many_arguments)]
    async fn process_command(
        &self,
        action: &str,
        codec: &C,
        payload: &[u8],
        offset: i64,
        corr_id: Uuid,
        version_store: &VersionStore,
        output: &mut BatchOutput,
        producer: &dyn StreamProducer,
        response_topic: &str,
    ) -> Result<(), ExecutorError>;

    /// Apply one update-topic message observed during hydration.
    fn process_hydration_message(
        &self,
        codec: &C,
        payload: &[u8],
        version_store: &mut VersionStore,
    ) -> Result<(), ExecutorError>;
}

/// The dispatch-table entry for a single statically-typed entity `T`.
/// Zero-sized; `T` is carried only in the type system.
pub struct TypedEntityHandler<T> {
    _entity: PhantomData<T>,
}

impl<T> Default for TypedEntityHandler<T> {
    fn default() -> Self {
        Self { _entity: PhantomData }
    }
}

impl<T: Entity> TypedEntityHandler<T> {
    /// Construct a handler for entity `T`.
    pub fn new() -> Self {
        Self::default()
    }

    fn version_mismatch_message(uuid: Uuid, cur_ver: Option<u32>, expected: u32) -> String {
        format!(
            "version mismatch for UUID {uuid}: current={}, expected={expected}",
            cur_ver.map(|v| v.to_string()).unwrap_or_else(|| "none".to_string()),
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_upsert<C: Codec>(
        &self,
        codec: &C,
        payload: &[u8],
        offset: i64,
        corr_id: Uuid,
        version_store: &VersionStore,
        output: &mut BatchOutput,
        producer: &dyn StreamProducer,
        response_topic: &str,
    ) -> Result<(), ExecutorError> {
        let cmd: Upsert<T> = codec.decode(payload)?;
        let cur_ver = current_version(output, version_store, &cmd.target_uuid);
        let accepted = (cur_ver.is_none() && cmd.expected_version == 0)
            || matches!(cur_ver, Some(v) if v == cmd.expected_version);

        let response = if accepted {
            let new_version = cur_ver.unwrap_or(0) + 1;
            let record = Record {
                header: RecordHeader {
                    uuid: cmd.target_uuid,
                    version: new_version,
                    is_active: true,
                    last_updated_by: cmd.updated_by,
                    last_updated_ts: Utc::now(),
                },
                data: cmd.data,
            };
            let encoded = codec.encode_shared(&record)?;
            output.version_updates.insert(cmd.target_uuid, new_version);
            output.record_updates.insert(cmd.target_uuid, encoded.clone());
            let update_msg = ProducerMessage::new(topics::update_topic(T::NAME), cmd.target_uuid.to_string(), encoded)
                .with_id(offset);
            producer.send(update_msg).await?;
            CommandResponse { corr_id, status: CommandStatus::Success, message: None }
        } else {
            CommandResponse {
                corr_id,
                status: CommandStatus::Rejected,
                message: Some(Self::version_mismatch_message(cmd.target_uuid, cur_ver, cmd.expected_version)),
            }
        };
        output.responses.push((response, response_topic.to_string()));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_deactivate<C: Codec>(
        &self,
        codec: &C,
        payload: &[u8],
        offset: i64,
        corr_id: Uuid,
        version_store: &VersionStore,
        output: &mut BatchOutput,
        producer: &dyn StreamProducer,
        response_topic: &str,
    ) -> Result<(), ExecutorError> {
        let cmd: Deactivate<T> = codec.decode(payload)?;
        let cur_ver = current_version(output, version_store, &cmd.target_uuid);
        let version_ok = matches!(cur_ver, Some(v) if v == cmd.expected_version);
        let prior_bytes = if version_ok {
            output
                .record_updates
                .get(&cmd.target_uuid)
                .cloned()
                .or_else(|| version_store.latest_record(&cmd.target_uuid).cloned())
        } else {
            None
        };

        // A matching version with no backing bytes means the version store
        // and the batch's staged output both missed the record that
        // produced that version. That's an internal inconsistency, not a
        // normal rejection, so it's raised rather than answered with a
        // response.
        if version_ok && prior_bytes.is_none() {
            return Err(ExecutorError::MissingLatestRecord(cmd.target_uuid));
        }

        let response = match prior_bytes {
            Some(prior_bytes) => {
                let prior: Record<T> = codec.decode(&prior_bytes)?;
                let new_version = cur_ver.unwrap() + 1;
                let record = Record {
                    header: RecordHeader {
                        uuid: cmd.target_uuid,
                        version: new_version,
                        is_active: false,
                        last_updated_by: cmd.updated_by,
                        last_updated_ts: Utc::now(),
                    },
                    data: prior.data,
                };
                let encoded = codec.encode_shared(&record)?;
                output.version_updates.insert(cmd.target_uuid, new_version);
                output.record_updates.insert(cmd.target_uuid, encoded.clone());
                let update_msg =
                    ProducerMessage::new(topics::update_topic(T::NAME), cmd.target_uuid.to_string(), encoded)
                        .with_id(offset);
                producer.send(update_msg).await?;
                CommandResponse { corr_id, status: CommandStatus::Success, message: None }
            }
            None => CommandResponse {
                corr_id,
                status: CommandStatus::Rejected,
                message: Some(Self::version_mismatch_message(cmd.target_uuid, cur_ver, cmd.expected_version)),
            },
        };
        output.responses.push((response, response_topic.to_string()));
        Ok(())
    }
}

#[async_trait]
impl<T: Entity, C: Codec> EntityHandler<C> for TypedEntityHandler<T> {
    fn entity_name(&self) -> &'static str {
        T::NAME
    }

    async fn process_command(
        &self,
        action: &str,
        codec: &C,
        payload: &[u8],
        offset: i64,
        corr_id: Uuid,
        version_store: &VersionStore,
        output: &mut BatchOutput,
        producer: &dyn StreamProducer,
        response_topic: &str,
    ) -> Result<(), ExecutorError> {
        match action {
            cmd_action::UPSERT => {
                self.process_upsert(codec, payload, offset, corr_id, version_store, output, producer, response_topic)
                    .await
            }
            cmd_action::DEACTIVATE => {
                self.process_deactivate(codec, payload, offset, corr_id, version_store, output, producer, response_topic)
                    .await
            }
            other => Err(ExecutorError::UnknownAction(other.to_string())),
        }
    }

    fn process_hydration_message(
        &self,
        codec: &C,
        payload: &[u8],
        version_store: &mut VersionStore,
    ) -> Result<(), ExecutorError> {
        let record: Record<T> = codec.decode(payload)?;
        let shared = refdata_codec::SharedBuffer::from(payload.to_vec().into_boxed_slice());
        version_store.apply_hydrated(record.header.uuid, record.header.version, shared);
        Ok(())
    }
}
