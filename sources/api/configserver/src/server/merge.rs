//! Combining an existing stored value with an incoming one.
//!
//! PUT always replaces.  PATCH merges, and each resource type picks one of two ways to do it:
//! field-level merge for flat records, or key-level merge for keyed collections.  In both cases
//! entries named by the patch win and everything else survives.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use snafu::ensure;
use std::collections::btree_map::{self, BTreeMap};
use std::fmt;

use super::error::{self, Result};

/// How an incoming value is combined with the stored one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// The incoming value becomes the stored value.
    Replace,
    /// Each top-level field in the incoming record overwrites the same field in the stored one.
    FieldMerge,
    /// Each key in the incoming collection overwrites the same key in the stored one.
    KeyMerge,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::Replace => "replace",
            Strategy::FieldMerge => "field merge",
            Strategy::KeyMerge => "key merge",
        };
        write!(f, "{}", name)
    }
}

/// Values that know how to absorb a patch.
pub trait Merge: Default {
    /// The merge strategy `merge` implements.
    const STRATEGY: Strategy;

    /// Folds `patch` into `self`.  Entries in `patch` win.
    fn merge(&mut self, patch: Self);
}

/// Produces the value to store, given what's stored now (if anything) and the incoming value.
/// Merging into an absent value merges into an empty one, so the result is the patch itself.
pub fn apply_patch<T: Merge>(existing: Option<T>, patch: T, strategy: Strategy) -> Result<T> {
    match strategy {
        Strategy::Replace => Ok(patch),
        s if s == T::STRATEGY => {
            let mut merged = existing.unwrap_or_default();
            merged.merge(patch);
            Ok(merged)
        }
        strategy => error::UnsupportedStrategySnafu { strategy }.fail(),
    }
}

/// For values that don't merge; only Replace is accepted.
pub fn replace_only<T>(patch: T, strategy: Strategy) -> Result<T> {
    ensure!(
        strategy == Strategy::Replace,
        error::UnsupportedStrategySnafu { strategy }
    );
    Ok(patch)
}

/// A flat record: a JSON object whose values are scalars or arrays.  Used for resources whose
/// fields are updated independently, like per-AU state and user accounts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Checks that a decoded JSON value is a record.  Nested objects are refused; a field merge
    /// only reaches top-level fields.
    pub fn from_json(value: Value) -> Result<Self> {
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return error::InvalidRecordSnafu {
                    msg: format!("expected a JSON object, got '{}'", other),
                }
                .fail()
            }
        };
        if let Some((name, _)) = fields.iter().find(|(_, v)| v.is_object()) {
            return error::InvalidRecordSnafu {
                msg: format!("field '{}' is a nested object", name),
            }
            .fail();
        }
        Ok(Record(fields))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Merge for Record {
    const STRATEGY: Strategy = Strategy::FieldMerge;

    fn merge(&mut self, patch: Self) {
        // A null in the patch is stored as null; clearing a field is a write like any other.
        for (field, value) in patch.0 {
            self.0.insert(field, value);
        }
    }
}

/// A collection of entries keyed by an ordered key, e.g. peer agreements keyed by peer and
/// agreement type.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyedCollection<K: Ord, V>(BTreeMap<K, V>);

impl<K: Ord, V> Default for KeyedCollection<K, V> {
    fn default() -> Self {
        KeyedCollection(BTreeMap::new())
    }
}

impl<K: Ord, V> KeyedCollection<K, V> {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.0.insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.0.get(key)
    }

    pub fn iter(&self) -> btree_map::Iter<'_, K, V> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Ord, V> Merge for KeyedCollection<K, V> {
    const STRATEGY: Strategy = Strategy::KeyMerge;

    fn merge(&mut self, patch: Self) {
        self.0.extend(patch.0);
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for KeyedCollection<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        KeyedCollection(iter.into_iter().collect())
    }
}

impl<K: Ord, V> IntoIterator for KeyedCollection<K, V> {
    type Item = (K, V);
    type IntoIter = btree_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, K: Ord, V> IntoIterator for &'a KeyedCollection<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = btree_map::Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
