//! The stored cache entry.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::options::CacheOptions;
use crate::Timestamp;

/// A cached query result together with the options it was written under.
///
/// Entries are immutable once written: a new write for the same key fully
/// replaces the previous entry, never partially updates it. The store owns
/// entries exclusively; the coordinator never mutates one after retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// When the result was produced and written.
    pub created_at: Timestamp,
    /// The cache options in effect for this write.
    pub options: CacheOptions,
    /// The opaque serialized query result.
    pub result: Value,
}

impl CacheEntry {
    /// Create an entry for a result produced at `created_at`.
    pub fn new(result: Value, options: CacheOptions, created_at: Timestamp) -> Self {
        Self {
            created_at,
            options,
            result,
        }
    }

    /// Total physical TTL for the store record, in seconds.
    pub fn total_ttl(&self) -> Option<u64> {
        self.options.total_ttl()
    }

    /// Absolute expiry deadline of the store record, or `None` when the
    /// record lives until explicitly invalidated.
    pub fn expires_at(&self) -> Option<Timestamp> {
        self.total_ttl()
            .map(|ttl| self.created_at + Duration::seconds(ttl as i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use std::num::NonZeroU32;

    #[test]
    fn expires_at_follows_total_ttl() {
        let now = Utc::now();
        let options = CacheOptions::new()
            .with_ttl(NonZeroU32::new(60).unwrap())
            .with_swr(NonZeroU32::new(30).unwrap());
        let entry = CacheEntry::new(json!({"id": 1}), options, now);

        assert_eq!(entry.expires_at(), Some(now + Duration::seconds(90)));
    }

    #[test]
    fn untimed_entry_never_expires() {
        let entry = CacheEntry::new(
            json!(null),
            CacheOptions::new().with_tags(["t"]),
            Utc::now(),
        );
        assert_eq!(entry.expires_at(), None);
    }

    #[test]
    fn entry_round_trips_through_json() {
        let entry = CacheEntry::new(
            json!({"name": "a", "nested": {"b": [1, 2]}}),
            CacheOptions::new().with_ttl(NonZeroU32::new(5).unwrap()),
            Utc::now(),
        );
        let decoded: CacheEntry =
            serde_json::from_str(&serde_json::to_string(&entry).unwrap()).unwrap();
        assert_eq!(decoded, entry);
    }
}
