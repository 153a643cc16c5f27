#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **refdata-types** – Shared primitive data structures for the RefData
//! write path.
//!
//! The crate is dependency-light and sits at the bottom of the crate graph
//! so that every other RefData crate can depend on it without cycles. It
//! makes no assumptions about I/O, serialization wire format, or storage –
//! those concerns live in `refdata-codec`, `refdata-stream-core`, and the
//! concrete entity crates.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//─────────────────────────────
//  Message header constants
//─────────────────────────────

/// Header carrying the correlation id echoed back on the response.
pub const HEADER_CORR_ID: &str = "ARQ_CorrID";
/// Header carrying the messaging-bus subject to publish the response to.
pub const HEADER_RESPONSE_TOPIC: &str = "ARQ_ResponseTopic";
/// Header carrying the command action (`Upsert` / `Deactivate`).
pub const HEADER_CMD_ACTION: &str = "ARQ_CmdAction";

/// Well-known values of [`HEADER_CMD_ACTION`].
pub mod cmd_action {
    /// Upsert command action.
    pub const UPSERT: &str = "Upsert";
    /// Deactivate command action.
    pub const DEACTIVATE: &str = "Deactivate";
}

//─────────────────────────────
//  Record<T>
//─────────────────────────────

/// Metadata carried by every committed [`Record`], independent of the
/// entity-specific payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordHeader {
    /// Stable entity identifier, constant across versions.
    pub uuid: Uuid,
    /// Monotonically increasing version counter, starting at 1.
    pub version: u32,
    /// False once the entity has been deactivated.
    pub is_active: bool,
    /// Opaque principal identifier that authored this version.
    pub last_updated_by: String,
    /// UTC timestamp (microsecond resolution) at commit time.
    pub last_updated_ts: DateTime<Utc>,
}

/// A versioned snapshot of an entity `T`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
    /// Version-independent metadata.
    pub header: RecordHeader,
    /// Entity-specific payload, opaque to the write path.
    pub data: T,
}

//─────────────────────────────
//  Commands
//─────────────────────────────

/// A write request to create or update an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upsert<T> {
    /// Entity targeted by this command.
    pub target_uuid: Uuid,
    /// New payload to persist if the command is accepted.
    pub data: T,
    /// Opaque identifier of the principal issuing the command.
    pub updated_by: String,
    /// Version the caller believes is currently committed (0 = new entity).
    pub expected_version: u32,
}

/// A write request to mark an existing entity inactive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deactivate<T> {
    /// Entity targeted by this command.
    pub target_uuid: Uuid,
    /// Opaque identifier of the principal issuing the command.
    pub updated_by: String,
    /// Version the caller believes is currently committed.
    pub expected_version: u32,
    /// Marker keeping the entity type associated with this command, so
    /// callers can't accidentally deactivate against the wrong dispatch
    /// entry. The payload carries no entity data.
    #[serde(skip)]
    pub _entity: std::marker::PhantomData<T>,
}

impl<T> Default for Deactivate<T> {
    fn default() -> Self {
        Self {
            target_uuid: Uuid::nil(),
            updated_by: String::new(),
            expected_version: 0,
            _entity: std::marker::PhantomData,
        }
    }
}

//─────────────────────────────
//  CommandResponse
//─────────────────────────────

/// Outcome of a processed command, delivered over the messaging bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Correlation id copied from the originating command's headers.
    pub corr_id: Uuid,
    /// Outcome of the command.
    pub status: CommandStatus,
    /// Human-readable detail, populated for non-`Success` outcomes.
    pub message: Option<String>,
}

/// Possible outcomes of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandStatus {
    /// The command was accepted and its update committed.
    Success,
    /// The command failed the optimistic-concurrency check.
    Rejected,
    /// The command failed for a reason other than a version conflict.
    Error,
    /// No response was observed within the caller's timeout window.
    Timeout,
}

//─────────────────────────────
//  Validation
//─────────────────────────────

/// Errors produced validating a type in this crate before it is staged
/// into a batch or sent over the wire.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    /// `updated_by` was empty.
    #[error("updated_by must not be empty")]
    EmptyUpdatedBy,
}

impl<T> Upsert<T> {
    /// Validate the command-independent invariants of an upsert.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.updated_by.trim().is_empty() {
            return Err(ValidationError::EmptyUpdatedBy);
        }
        Ok(())
    }
}

impl<T> Deactivate<T> {
    /// Validate the command-independent invariants of a deactivate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.updated_by.trim().is_empty() {
            return Err(ValidationError::EmptyUpdatedBy);
        }
        Ok(())
    }
}

//─────────────────────────────
//  Topic naming
//─────────────────────────────

/// Topic namespace helpers, kept here so services and tests agree on
/// naming without duplicating string formatting.
pub mod topics {
    /// The command topic for a given entity name.
    pub fn command_topic(entity_name: &str) -> String {
        format!("ARQ.RefData.Commands.{entity_name}")
    }

    /// The update topic for a given entity name.
    pub fn update_topic(entity_name: &str) -> String {
        format!("ARQ.RefData.Updates.{entity_name}")
    }

    /// The dead-letter topic for any source topic.
    pub fn dlq_topic(source_topic: &str) -> String {
        format!("{source_topic}.DLQ")
    }
}

/// Consumer group identifiers used across the write path.
pub mod groups {
    /// Consumer group shared by all command executor instances.
    pub const COMMAND_EXECUTORS: &str = "ARQ.RefData.CommandExecutors";
    /// Disposable hydration consumer group; offsets are never committed.
    pub const HYDRATION: &str = "ARQ.RefData.CommandExecutors.UpdateHydration";
    /// Consumer group shared by all audit projector instances.
    pub const AUDIT_PROJECTORS: &str = "ARQ.RefData.AuditProjectors";
}

/// A `(topic, partition)` pair, used throughout the stream abstractions.
pub type TopicPartition = (String, i32);

/// A map from `(topic, partition)` to an offset, used both for
/// hydration high-watermarks and for `sendOffsetsToTransaction`-style
/// offset coupling.
pub type TopicPartitionOffsets = HashMap<TopicPartition, i64>;
