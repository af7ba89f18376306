//! Tag-set bookkeeping and its TTL policy.
//!
//! Each tag maps to the set of entry keys written carrying that tag, plus
//! an expiry deadline of its own. The deadline follows the policy shared by
//! every backend:
//!
//! - a timed write extends the tag-set deadline to the maximum of the
//!   current deadline and the write's own expiry (never shrinks it),
//! - a timed write to a set with no deadline arms the deadline at the
//!   write's expiry (the set was new, or had been persisted),
//! - an untimed write clears the deadline entirely: an untimed reference
//!   means the tag must now outlive every timed one before it.
//!
//! This is exactly the behavior of Redis `EXPIRE .. GT` + `EXPIRE .. NX` +
//! `PERSIST`, so [`MemoryStore`](crate::MemoryStore) and
//! [`RedisStore`](crate::RedisStore) agree observably.

use std::collections::{HashMap, HashSet};

use recache_core::{CacheKey, Timestamp};

/// Next expiry deadline for a tag-set after a write referencing it.
///
/// `current` is the set's deadline before the write (`None` = no deadline);
/// `write_expiry` is the expiry of the entry being written (`None` for an
/// untimed entry).
pub fn next_tag_expiry(
    current: Option<Timestamp>,
    write_expiry: Option<Timestamp>,
) -> Option<Timestamp> {
    match (current, write_expiry) {
        (_, None) => None,
        (None, Some(write)) => Some(write),
        (Some(current), Some(write)) => Some(current.max(write)),
    }
}

#[derive(Debug)]
struct TagSet {
    members: HashSet<CacheKey>,
    expires_at: Option<Timestamp>,
}

/// In-memory tag index: tag name -> set of referencing entry keys.
#[derive(Debug, Default)]
pub struct TagIndex {
    sets: HashMap<String, TagSet>,
}

impl TagIndex {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a write of `key` under `tags`, applying the TTL policy with
    /// the write's own expiry deadline.
    ///
    /// A set whose deadline has already passed at `now` is swept first: the
    /// write lands in a fresh set, just as `SADD` after Redis eviction does.
    pub fn record(
        &mut self,
        key: &CacheKey,
        tags: &[String],
        write_expiry: Option<Timestamp>,
        now: Timestamp,
    ) {
        for tag in tags {
            if self
                .sets
                .get(tag)
                .is_some_and(|set| is_expired(set.expires_at, now))
            {
                self.sets.remove(tag);
            }
            let set = self.sets.entry(tag.clone()).or_insert_with(|| TagSet {
                members: HashSet::new(),
                expires_at: None,
            });
            set.members.insert(key.clone());
            set.expires_at = next_tag_expiry(set.expires_at, write_expiry);
        }
    }

    /// Remove the tag-set for `tag` and return its members. An expired or
    /// absent set yields no members. Idempotent: a second take is empty.
    pub fn take(&mut self, tag: &str, now: Timestamp) -> Vec<CacheKey> {
        match self.sets.remove(tag) {
            Some(set) if !is_expired(set.expires_at, now) => {
                set.members.into_iter().collect()
            }
            _ => Vec::new(),
        }
    }

    /// Whether a live tag-set exists for `tag`.
    pub fn contains(&self, tag: &str, now: Timestamp) -> bool {
        self.sets
            .get(tag)
            .is_some_and(|set| !is_expired(set.expires_at, now))
    }

    /// Expiry deadline of the tag-set for `tag`, `None` when the set is
    /// absent or has no deadline. Use [`contains`](Self::contains) to tell
    /// those apart.
    pub fn expires_at(&self, tag: &str) -> Option<Timestamp> {
        self.sets.get(tag).and_then(|set| set.expires_at)
    }

    /// Number of tag-sets still live at `now`. Expired sets are excluded;
    /// Redis would have evicted them already.
    pub fn len(&self, now: Timestamp) -> usize {
        self.sets
            .values()
            .filter(|set| !is_expired(set.expires_at, now))
            .count()
    }

    /// Whether the index holds no live tag-sets at `now`.
    pub fn is_empty(&self, now: Timestamp) -> bool {
        self.len(now) == 0
    }

    /// Drop every tag-set.
    pub fn clear(&mut self) {
        self.sets.clear();
    }
}

fn is_expired(expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    expires_at.is_some_and(|deadline| deadline <= now)
}
