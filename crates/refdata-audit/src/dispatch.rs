use std::marker::PhantomData;

use refdata_codec::{Codec, SharedBuffer};
use refdata_entities::Entity;
use refdata_types::Record;
use uuid::Uuid;

use crate::error::AuditError;
use crate::store::TypedRecordBytes;

/// The per-entity decode step of the audit projector's dispatch table:
/// validates that a raw update-topic payload decodes as its declared
/// entity type before it is staged for a bulk insert.
pub trait AuditEntityHandler<C: Codec>: Send + Sync {
    /// This handler's entity name.
    fn entity_name(&self) -> &'static str;

    /// Decode `payload` as a `Record<T>` and, on success, stage it as a
    /// [`TypedRecordBytes`] ready for [`crate::AuditStore::insert`].
    fn stage(&self, codec: &C, payload: SharedBuffer) -> Result<TypedRecordBytes, AuditError>;
}

/// The dispatch-table entry for a single statically-typed entity `T`.
pub struct TypedAuditHandler<T> {
    _entity: PhantomData<T>,
}

impl<T> Default for TypedAuditHandler<T> {
    fn default() -> Self {
        Self { _entity: PhantomData }
    }
}

impl<T: Entity> TypedAuditHandler<T> {
    /// Construct a handler for entity `T`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Entity, C: Codec> AuditEntityHandler<C> for TypedAuditHandler<T> {
    fn entity_name(&self) -> &'static str {
        T::NAME
    }

    fn stage(&self, codec: &C, payload: SharedBuffer) -> Result<TypedRecordBytes, AuditError> {
        let record: Record<T> = codec.decode(&payload)?;
        Ok(TypedRecordBytes {
            entity: T::NAME,
            uuid: record.header.uuid,
            version: record.header.version,
            bytes: payload,
        })
    }
}
