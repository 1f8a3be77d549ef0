/*!
# Background

A 'resource store' holds the named configuration resources served by configserver: config
sections, AU configurations, and the per-AU state records.  Alongside each resource it keeps a
version stamp, the last-modified time the resource was written at, from which ETags are derived.

For more detail about how the stamps are used, see [configserver](../configserver).

# Library

This library provides a trait defining the exact requirements, along with basic implementations
for filesystem and memory stores.

Stores don't interpret the bytes they keep.  What they do guarantee is a consistent view of
`(value, stamp)` for each resource and a compare-and-swap `save`: a write names the stamp it
expects the resource to have (or that it expects the resource to be absent), and fails with
`Error::Conflict` if the store has anything else.  This is what lets several writers share a
resource without holding locks across a request.

# Current limitations

* Compare-and-swap is serialized within one process.  Two processes sharing one filesystem store
  are not coordinated with each other.
*/

pub mod error;
pub mod filesystem;
pub mod id;
pub mod memory;
pub mod stamp;

pub use error::{Error, Result};
pub use filesystem::FilesystemResourceStore;
pub use id::ResourceId;
pub use memory::MemoryResourceStore;
pub use stamp::{StampClock, VersionStamp};

use log::trace;
use snafu::ensure;
use std::collections::{BTreeMap, BTreeSet};

pub trait ResourceStore {
    /// Returns the current stamp of a resource, or None if it doesn't exist.  This should not
    /// read the resource's value.
    fn probe_stamp(&self, id: &ResourceId) -> Result<Option<VersionStamp>>;

    /// Retrieves the value of a resource along with the stamp of that exact version.
    fn load(&self, id: &ResourceId) -> Result<Option<(Vec<u8>, VersionStamp)>>;

    /// Stores a new value for a resource, if and only if the resource's current stamp equals
    /// `expected`; None means the resource must not exist yet.  Returns the stamp of the new
    /// version, or Error::Conflict if the resource had changed.
    fn save(
        &self,
        id: &ResourceId,
        value: &[u8],
        expected: Option<&VersionStamp>,
    ) -> Result<VersionStamp>;

    /// Removes a resource.  If `expected` is given, the resource must currently have that stamp,
    /// or Error::Conflict is returned and nothing is removed.  Returns whether the resource
    /// existed; removing an absent resource without an expected stamp is Ok(false).
    fn delete(&self, id: &ResourceId, expected: Option<&VersionStamp>) -> Result<bool>;

    /// Returns the ids of all resources currently stored in the given scope.
    fn list(&self, scope: &str) -> Result<BTreeSet<ResourceId>>;

    /// Retrieves every resource in the given scope, returning them in an id -> value map.
    /// Resources removed between listing and loading are skipped.
    fn load_scope(&self, scope: &str) -> Result<BTreeMap<ResourceId, Vec<u8>>> {
        let ids = self.list(scope)?;
        trace!("Found {} resources in scope '{}'", ids.len(), scope);

        let mut result = BTreeMap::new();
        for id in ids {
            match self.load(&id)? {
                Some((value, _stamp)) => {
                    result.insert(id, value);
                }
                None => trace!("Listed resource {} was removed before loading", id),
            }
        }
        Ok(result)
    }
}

/// Compares the stamp a writer expects against the stamp the store currently has.  Stores call
/// this while holding their write lock.
pub(crate) fn check_expected(
    id: &ResourceId,
    expected: Option<&VersionStamp>,
    current: Option<&VersionStamp>,
) -> Result<()> {
    ensure!(
        expected == current,
        error::ConflictSnafu {
            id: id.to_string(),
            expected: describe_stamp(expected),
            found: describe_stamp(current),
        }
    );
    Ok(())
}

fn describe_stamp(stamp: Option<&VersionStamp>) -> String {
    match stamp {
        Some(stamp) => format!("version {}", stamp),
        None => "no resource".to_string(),
    }
}
