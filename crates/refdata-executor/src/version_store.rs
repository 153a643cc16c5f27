use std::collections::HashMap;

use refdata_codec::SharedBuffer;
use uuid::Uuid;

/// Partition-scoped `{entityUUID → (version, latestSerializedRecord)}`
/// state. Contains exactly the UUIDs whose update partitions are
/// currently assigned to this executor.
///
/// Not `Sync`: the executor is single-threaded over its own state and
/// this store is only ever touched from its main loop, so no interior
/// synchronization is provided.
#[derive(Debug, Default)]
pub struct VersionStore {
    version_map: HashMap<Uuid, u32>,
    latest_record_map: HashMap<Uuid, SharedBuffer>,
}

impl VersionStore {
    /// An empty store, as constructed immediately after a rebalance.
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently committed version for `uuid`, or `None` if it has
    /// never been committed within this executor's assigned partitions.
    pub fn version(&self, uuid: &Uuid) -> Option<u32> {
        self.version_map.get(uuid).copied()
    }

    /// The last committed serialized record for `uuid`, needed to
    /// reconstruct `data` on a Deactivate.
    pub fn latest_record(&self, uuid: &Uuid) -> Option<&SharedBuffer> {
        self.latest_record_map.get(uuid)
    }

    /// Merge a successfully committed batch's staged updates into the
    /// store. Called once per batch, after the transaction commits.
    pub fn apply(
        &mut self,
        version_updates: HashMap<Uuid, u32>,
        record_updates: HashMap<Uuid, SharedBuffer>,
    ) {
        self.version_map.extend(version_updates);
        self.latest_record_map.extend(record_updates);
    }

    /// Record one hydrated update-topic message. Last-write-wins is
    /// correct here because versions are strictly increasing per UUID
    /// within a partition.
    pub fn apply_hydrated(&mut self, uuid: Uuid, version: u32, record: SharedBuffer) {
        self.version_map.insert(uuid, version);
        self.latest_record_map.insert(uuid, record);
    }

    /// Drop all state. Called at the start of every rebalance, before
    /// hydration (if any) rebuilds it.
    pub fn clear(&mut self) {
        self.version_map.clear();
        self.latest_record_map.clear();
    }

    /// Number of distinct UUIDs currently tracked.
    pub fn len(&self) -> usize {
        self.version_map.len()
    }

    /// Whether the store currently tracks no UUIDs.
    pub fn is_empty(&self) -> bool {
        self.version_map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(bytes: &[u8]) -> SharedBuffer {
        SharedBuffer::from(bytes.to_vec().into_boxed_slice())
    }

    #[test]
    fn apply_merges_without_clearing_prior_entries() {
        let mut store = VersionStore::new();
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        store.apply(HashMap::from([(u1, 1)]), HashMap::from([(u1, buf(b"a"))]));
        store.apply(HashMap::from([(u2, 1)]), HashMap::from([(u2, buf(b"b"))]));
        assert_eq!(store.version(&u1), Some(1));
        assert_eq!(store.version(&u2), Some(1));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn clear_removes_every_entry() {
        let mut store = VersionStore::new();
        let u1 = Uuid::new_v4();
        store.apply(HashMap::from([(u1, 1)]), HashMap::from([(u1, buf(b"a"))]));
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.version(&u1), None);
        assert!(store.latest_record(&u1).is_none());
    }

    #[test]
    fn hydration_last_write_wins_without_explicit_comparison() {
        let mut store = VersionStore::new();
        let uuid = Uuid::new_v4();
        store.apply_hydrated(uuid, 1, buf(b"v1"));
        store.apply_hydrated(uuid, 2, buf(b"v2"));
        store.apply_hydrated(uuid, 3, buf(b"v3"));
        assert_eq!(store.version(&uuid), Some(3));
        assert_eq!(store.latest_record(&uuid).map(|b| b.as_ref()), Some(b"v3".as_slice()));
    }
}
