//! The controller module runs a request against the resource store: it probes the current
//! version stamp, asks the precondition evaluator for a verdict, and only when the verdict allows
//! it, loads, merges, and saves.
//!
//! Nothing here holds a lock.  Writes are made safe by handing the stamp we probed to the store's
//! compare-and-swap save, so a write that raced with another writer fails instead of silently
//! overwriting it.

use configstore::{ResourceId, ResourceStore, VersionStamp};
use log::{debug, info, trace};
use snafu::ensure;

use super::envelope::{Envelope, APPLICATION_JSON};
use super::error::{self, from_store, Error, Result};
use super::kinds::{AuConfig, ResourceKind};
use super::merge::Strategy;
use super::precondition::{evaluate, Preconditions, Verb, Verdict};
use super::Outcome;
use crate::identity::IdentityResolver;

/// Gets the current stamp of a resource without touching its value.
fn probe<S>(store: &S, id: &ResourceId) -> Result<Option<VersionStamp>>
where
    S: ResourceStore + ?Sized,
{
    trace!("Probing stamp of '{}'", id);
    store
        .probe_stamp(id)
        .map_err(|e| from_store(id.to_string(), "probe", e))
}

/// Returns the stored value and an envelope describing it, or NotModified if the client's copy
/// is current.
pub(crate) fn read<S, K>(
    store: &S,
    kind: &K,
    id: &ResourceId,
    preconditions: &Preconditions,
) -> Result<Outcome>
where
    S: ResourceStore + ?Sized,
    K: ResourceKind,
{
    let current = probe(store, id)?;
    if let Some(outcome) = read_verdict(id, preconditions, current)? {
        return Ok(outcome);
    }

    let (payload, stamp) = match store
        .load(id)
        .map_err(|e| from_store(id.to_string(), "load", e))?
    {
        Some(loaded) => loaded,
        // Deleted since we probed.
        None => return error::NotFoundSnafu { id: id.to_string() }.fail(),
    };

    // A write landed between the probe and the load; the preconditions have to hold for the
    // version we're actually returning.
    if let Some(outcome) = read_verdict(id, preconditions, Some(stamp.clone()))? {
        debug!("'{}' changed during read, rechecked preconditions", id);
        return Ok(outcome);
    }

    let content_type = kind.content_type(&payload);
    Ok(Outcome::Found(Envelope::new(content_type, payload, stamp)))
}

/// Applies the evaluator's verdict for a read.  Returns Some outcome if the request is decided
/// without loading the value, or None if the value should be loaded.
fn read_verdict(
    id: &ResourceId,
    preconditions: &Preconditions,
    current: Option<VersionStamp>,
) -> Result<Option<Outcome>> {
    match (evaluate(preconditions, current.as_ref(), Verb::Read), current) {
        (Verdict::PreconditionFailed(header), _) => error::PreconditionFailedSnafu {
            id: id.to_string(),
            header,
        }
        .fail(),
        (Verdict::NotModified, Some(stamp)) => {
            debug!("'{}' not modified since {}", id, stamp);
            Ok(Some(Outcome::NotModified(stamp)))
        }
        (_, None) => error::NotFoundSnafu { id: id.to_string() }.fail(),
        (_, Some(_)) => Ok(None),
    }
}

/// Stores a new value for a resource, combining it with the existing value according to
/// `strategy`.  `patch` has already been decoded and validated.
pub(crate) fn write<S, K>(
    store: &S,
    kind: &K,
    id: &ResourceId,
    preconditions: &Preconditions,
    patch: K::Value,
    strategy: Strategy,
    resolver: &dyn IdentityResolver,
) -> Result<Outcome>
where
    S: ResourceStore + ?Sized,
    K: ResourceKind,
{
    let current = probe(store, id)?;
    if let Verdict::PreconditionFailed(header) =
        evaluate(preconditions, current.as_ref(), Verb::Write)
    {
        return error::PreconditionFailedSnafu {
            id: id.to_string(),
            header,
        }
        .fail();
    }

    let value = match (strategy, &current) {
        (Strategy::Replace, _) | (_, None) => kind.merge(None, patch, strategy)?,
        (_, Some(probed)) => {
            let existing = load_existing(store, kind, id, probed, resolver)?;
            kind.merge(Some(existing), patch, strategy)?
        }
    };
    let encoded = kind.encode(&value)?;

    // The probed stamp is the version the preconditions were checked against; the store refuses
    // the save if that's no longer current.
    let stamp = store
        .save(id, &encoded, current.as_ref())
        .map_err(|e| from_store(id.to_string(), "save", e))?;
    info!(
        "Stored '{}' ({}, {} bytes) at {}",
        id,
        strategy,
        encoded.len(),
        stamp
    );

    Ok(Outcome::Stored {
        stamp,
        created: current.is_none(),
    })
}

/// Loads and decodes the existing value for a merge.  The value must still be at the probed
/// version, otherwise the merge would be based on something the preconditions never saw.
fn load_existing<S, K>(
    store: &S,
    kind: &K,
    id: &ResourceId,
    probed: &VersionStamp,
    resolver: &dyn IdentityResolver,
) -> Result<K::Value>
where
    S: ResourceStore + ?Sized,
    K: ResourceKind,
{
    let loaded = store
        .load(id)
        .map_err(|e| from_store(id.to_string(), "load", e))?;
    let (payload, stamp) = match loaded {
        Some(loaded) => loaded,
        None => return error::ChangedDuringRequestSnafu { id: id.to_string() }.fail(),
    };
    ensure!(
        stamp == *probed,
        error::ChangedDuringRequestSnafu { id: id.to_string() }
    );

    kind.decode(id.name(), &payload, resolver)
        .map_err(|e| Error::StoredValue {
            id: id.to_string(),
            msg: e.to_string(),
        })
}

/// Removes a resource.  Removing something that doesn't exist isn't an error, unless the
/// preconditions required it to exist.
pub(crate) fn delete<S>(store: &S, id: &ResourceId, preconditions: &Preconditions) -> Result<Outcome>
where
    S: ResourceStore + ?Sized,
{
    let current = probe(store, id)?;
    if let Verdict::PreconditionFailed(header) =
        evaluate(preconditions, current.as_ref(), Verb::Write)
    {
        return error::PreconditionFailedSnafu {
            id: id.to_string(),
            header,
        }
        .fail();
    }

    let existed = match &current {
        Some(stamp) => store
            .delete(id, Some(stamp))
            .map_err(|e| from_store(id.to_string(), "delete", e))?,
        None => false,
    };
    info!("Deleted '{}' (existed: {})", id, existed);
    Ok(Outcome::Deleted { existed })
}

/// Builds a listing of every AU configuration, as a JSON array.  Listings describe many
/// resources, so they carry no stamp of their own.
pub(crate) fn list_au_configs<S>(store: &S, resolver: &dyn IdentityResolver) -> Result<Envelope>
where
    S: ResourceStore + ?Sized,
{
    let stored = store
        .load_scope(AuConfig::SCOPE)
        .map_err(|e| from_store(AuConfig::SCOPE, "list", e))?;

    let mut configs = Vec::with_capacity(stored.len());
    for (id, payload) in stored {
        let config = AuConfig
            .decode(id.name(), &payload, resolver)
            .map_err(|e| Error::StoredValue {
                id: id.to_string(),
                msg: e.to_string(),
            })?;
        configs.push(config);
    }
    debug!("Listing {} AU configurations", configs.len());

    let payload = serde_json::to_vec(&configs).map_err(|source| Error::Serialization {
        given: "AU configuration listing".to_string(),
        source,
    })?;
    Ok(Envelope::listing(APPLICATION_JSON, payload))
}
