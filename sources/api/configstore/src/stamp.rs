//! Version stamps identify one stored version of a resource.
//!
//! The stamp is the resource's last-modified time in milliseconds; the ETag is derived from it,
//! so two stamps with the same time always carry the same ETag.  Stamps are handed out by a
//! StampClock, which never issues the same time twice, so a stamp also identifies the write that
//! produced it.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use std::cmp;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

/// The last-modified time of a stored resource and the ETag derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionStamp {
    last_modified_ms: i64,
    etag: String,
}

impl VersionStamp {
    /// Builds the stamp for a resource last modified at the given time.
    pub fn from_millis(last_modified_ms: i64) -> Self {
        Self {
            last_modified_ms,
            etag: last_modified_ms.to_string(),
        }
    }

    pub fn last_modified_ms(&self) -> i64 {
        self.last_modified_ms
    }

    /// The opaque version tag, without the quotes used on the wire.
    pub fn etag(&self) -> &str {
        &self.etag
    }

    /// The last-modified time as a calendar time.  Out-of-range values (which the clock never
    /// produces) fall back to the epoch.
    pub fn last_modified(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_modified_ms)
            .single()
            .unwrap_or_default()
    }
}

impl fmt::Display for VersionStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.etag)
    }
}

/// Issues strictly increasing version stamps.
///
/// Stamps follow the wall clock when it moves forward, and step one millisecond past the last
/// issued stamp when it doesn't (several writes in the same millisecond, or the clock stepping
/// backward).
#[derive(Debug, Default)]
pub struct StampClock {
    last_issued_ms: AtomicI64,
}

impl StampClock {
    pub fn new() -> Self {
        Default::default()
    }

    /// Issues a stamp later than every stamp issued so far and later than `prior`, the current
    /// stamp of the resource being written, if any.  `prior` matters for stores that outlive the
    /// process, where the resource may carry a stamp this clock never issued.
    pub fn next_after(&self, prior: Option<&VersionStamp>) -> VersionStamp {
        let now = Utc::now().timestamp_millis();
        let floor = prior.map(|s| s.last_modified_ms.saturating_add(1));

        let mut issued = now;
        // fetch_update only fails if the closure returns None, which ours never does.
        let _ = self
            .last_issued_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                issued = cmp::max(now, last.saturating_add(1));
                if let Some(floor) = floor {
                    issued = cmp::max(issued, floor);
                }
                Some(issued)
            });

        VersionStamp::from_millis(issued)
    }
}
