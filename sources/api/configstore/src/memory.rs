//! In-memory resource store for use in testing other modules, or for embedding where nothing
//! needs to survive the process.
//!
//! Mimics the decisions made for FilesystemResourceStore, e.g. stamps coming from one clock per
//! store.

use snafu::OptionExt;
use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use super::{check_expected, error, ResourceId, ResourceStore, Result, StampClock, VersionStamp};

#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    // Resource -> (value, stamp of that value)
    resources: RwLock<HashMap<ResourceId, (Vec<u8>, VersionStamp)>>,
    clock: StampClock,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Default::default()
    }
}

impl ResourceStore for MemoryResourceStore {
    fn probe_stamp(&self, id: &ResourceId) -> Result<Option<VersionStamp>> {
        let resources = self.resources.read().ok().context(error::StoreLockSnafu)?;
        Ok(resources.get(id).map(|(_, stamp)| stamp.clone()))
    }

    fn load(&self, id: &ResourceId) -> Result<Option<(Vec<u8>, VersionStamp)>> {
        let resources = self.resources.read().ok().context(error::StoreLockSnafu)?;
        Ok(resources.get(id).cloned())
    }

    fn save(
        &self,
        id: &ResourceId,
        value: &[u8],
        expected: Option<&VersionStamp>,
    ) -> Result<VersionStamp> {
        let mut resources = self.resources.write().ok().context(error::StoreLockSnafu)?;
        let current = resources.get(id).map(|(_, stamp)| stamp);
        check_expected(id, expected, current)?;

        let stamp = self.clock.next_after(current);
        resources.insert(id.clone(), (value.to_vec(), stamp.clone()));
        Ok(stamp)
    }

    fn delete(&self, id: &ResourceId, expected: Option<&VersionStamp>) -> Result<bool> {
        let mut resources = self.resources.write().ok().context(error::StoreLockSnafu)?;
        if expected.is_some() {
            let current = resources.get(id).map(|(_, stamp)| stamp);
            check_expected(id, expected, current)?;
        }
        Ok(resources.remove(id).is_some())
    }

    fn list(&self, scope: &str) -> Result<BTreeSet<ResourceId>> {
        let resources = self.resources.read().ok().context(error::StoreLockSnafu)?;
        Ok(resources
            .keys()
            .filter(|id| id.scope() == scope)
            .cloned()
            .collect())
    }
}
