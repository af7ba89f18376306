//! Freshness classification for cache entries.
//!
//! Staleness is explicit here, never hidden: every read is classified as
//! fresh, stale, or miss against the entry's own windows, and the
//! coordinator routes on that classification.

use chrono::Duration;

use crate::entry::CacheEntry;
use crate::Timestamp;

/// Freshness of a cache entry at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Inside the fresh window: serve the cached result, nothing else.
    Fresh,
    /// Past the fresh window but inside the stale-while-revalidate window:
    /// serve the cached result and refresh in the background.
    Stale,
    /// Logically gone, even if a record is still physically present. The
    /// coordinator treats this exactly like an absent entry.
    Miss,
}

impl Freshness {
    /// Classify `entry` as of `now`.
    ///
    /// An entry carrying only `swr` has a zero-width fresh window: it is
    /// stale from the moment it is written, so every read serves the last
    /// result while refreshing. An entry with neither `ttl` nor `swr` is an
    /// immediate miss; it exists only for invalidation bookkeeping.
    pub fn classify(entry: &CacheEntry, now: Timestamp) -> Freshness {
        let elapsed = now.signed_duration_since(entry.created_at);
        let fresh = Duration::seconds(entry.options.fresh_seconds() as i64);

        if elapsed < fresh {
            return Freshness::Fresh;
        }
        if let Some(swr) = entry.options.swr {
            if elapsed < fresh + Duration::seconds(i64::from(swr.get())) {
                return Freshness::Stale;
            }
        }
        Freshness::Miss
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::CacheOptions;
    use chrono::Utc;
    use serde_json::json;
    use std::num::NonZeroU32;

    fn secs(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    fn entry_with(options: CacheOptions) -> (CacheEntry, Timestamp) {
        let created_at = Utc::now();
        (CacheEntry::new(json!(1), options, created_at), created_at)
    }

    fn at(created_at: Timestamp, elapsed_secs: i64) -> Timestamp {
        created_at + Duration::seconds(elapsed_secs)
    }

    #[test]
    fn fresh_window_boundary() {
        let (entry, t0) = entry_with(CacheOptions::new().with_ttl(secs(60)));

        assert_eq!(Freshness::classify(&entry, at(t0, 59)), Freshness::Fresh);
        assert_eq!(Freshness::classify(&entry, at(t0, 60)), Freshness::Miss);
        assert_eq!(Freshness::classify(&entry, at(t0, 61)), Freshness::Miss);
    }

    #[test]
    fn swr_window_boundary() {
        let (entry, t0) =
            entry_with(CacheOptions::new().with_ttl(secs(60)).with_swr(secs(60)));

        assert_eq!(Freshness::classify(&entry, at(t0, 59)), Freshness::Fresh);
        assert_eq!(Freshness::classify(&entry, at(t0, 90)), Freshness::Stale);
        assert_eq!(Freshness::classify(&entry, at(t0, 119)), Freshness::Stale);
        assert_eq!(Freshness::classify(&entry, at(t0, 150)), Freshness::Miss);
    }

    #[test]
    fn swr_only_entry_is_immediately_stale() {
        let (entry, t0) = entry_with(CacheOptions::new().with_swr(secs(60)));

        assert_eq!(Freshness::classify(&entry, t0), Freshness::Stale);
        assert_eq!(Freshness::classify(&entry, at(t0, 59)), Freshness::Stale);
        assert_eq!(Freshness::classify(&entry, at(t0, 60)), Freshness::Miss);
    }

    #[test]
    fn untimed_entry_is_an_immediate_miss() {
        let (entry, t0) = entry_with(CacheOptions::new().with_tags(["user1"]));

        assert_eq!(Freshness::classify(&entry, t0), Freshness::Miss);
        assert_eq!(Freshness::classify(&entry, at(t0, 1000)), Freshness::Miss);
    }
}
