use async_trait::async_trait;
use uuid::Uuid;

use refdata_codec::SharedBuffer;

/// One serialized record destined for a bulk insert, already validated to
/// decode cleanly as its declared entity type.
#[derive(Debug, Clone)]
pub struct TypedRecordBytes {
    /// The entity name this record belongs to (all records passed to one
    /// [`AuditStore::insert`] call share this).
    pub entity: &'static str,
    /// The entity instance this record describes.
    pub uuid: Uuid,
    /// The version stamped on this record.
    pub version: u32,
    /// Encoded `Record<T>` bytes, in the wire codec's format.
    pub bytes: SharedBuffer,
}

/// Durable sink for historical record versions.
///
/// Implementations must treat inserts as idempotent by `(uuid, version)`:
/// the projector commits offsets only after a bucket's insert succeeds,
/// so a crash between a successful insert and the matching offset commit
/// will replay (and must tolerate replaying) that bucket.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Bulk-insert `records`, all belonging to the same entity. Returns
    /// an error description on failure; the projector retries under its
    /// own backoff policy rather than the store retrying internally.
    async fn insert(&self, records: Vec<TypedRecordBytes>) -> Result<(), String>;
}

/// An in-process [`AuditStore`] backed by a `Vec`, keyed by `(uuid,
/// version)` for the same idempotent-replace semantics a real store
/// would provide.
#[derive(Debug, Default)]
pub struct MemoryAuditStore {
    inner: tokio::sync::Mutex<std::collections::HashMap<(Uuid, u32), TypedRecordBytes>>,
    fail_next: std::sync::atomic::AtomicU32,
}

impl MemoryAuditStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Arrange for the next `n` calls to [`AuditStore::insert`] to fail,
    /// exercising the projector's retry path without a real database.
    pub fn fail_next_inserts(&self, n: u32) {
        self.fail_next.store(n, std::sync::atomic::Ordering::SeqCst);
    }

    /// Snapshot of every record currently stored, for test assertions.
    pub async fn all(&self) -> Vec<TypedRecordBytes> {
        self.inner.lock().await.values().cloned().collect()
    }

    /// Number of distinct `(uuid, version)` rows currently stored.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, records: Vec<TypedRecordBytes>) -> Result<(), String> {
        let remaining = self.fail_next.load(std::sync::atomic::Ordering::SeqCst);
        if remaining > 0 {
            self.fail_next.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            return Err("injected audit store failure".to_string());
        }

        let mut guard = self.inner.lock().await;
        for record in records {
            guard.insert((record.uuid, record.version), record);
        }
        Ok(())
    }
}
