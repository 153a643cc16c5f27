use std::collections::HashMap;

use refdata_codec::SharedBuffer;
use refdata_types::CommandResponse;
use uuid::Uuid;

use crate::version_store::VersionStore;

/// Staged effects of processing one poll batch, applied to [`VersionStore`]
/// only after the batch's transaction has durably committed.
#[derive(Debug, Default)]
pub struct BatchOutput {
    /// Version bumps not yet merged into the `VersionStore`.
    pub version_updates: HashMap<Uuid, u32>,
    /// Serialized records not yet merged into the `VersionStore`.
    pub record_updates: HashMap<Uuid, SharedBuffer>,
    /// `(response, response subject)` pairs to publish after commit.
    pub responses: Vec<(CommandResponse, String)>,
}

/// The version a follow-up command in the same batch would observe:
/// an earlier command's staged update takes precedence over the
/// committed `VersionStore`, since later commands in a batch must see
/// earlier ones' effects even though nothing has been flushed yet.
pub fn current_version(output: &BatchOutput, version_store: &VersionStore, uuid: &Uuid) -> Option<u32> {
    output.version_updates.get(uuid).copied().or_else(|| version_store.version(uuid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_update_shadows_version_store() {
        let mut store = VersionStore::new();
        let uuid = Uuid::new_v4();
        store.apply(HashMap::from([(uuid, 1)]), HashMap::new());

        let mut output = BatchOutput::default();
        output.version_updates.insert(uuid, 2);

        assert_eq!(current_version(&output, &store, &uuid), Some(2));
    }

    #[test]
    fn falls_back_to_version_store_when_unstaged() {
        let mut store = VersionStore::new();
        let uuid = Uuid::new_v4();
        store.apply(HashMap::from([(uuid, 1)]), HashMap::new());

        let output = BatchOutput::default();
        assert_eq!(current_version(&output, &store, &uuid), Some(1));
    }
}
