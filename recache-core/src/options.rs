//! Typed cache options.
//!
//! Window widths use `NonZeroU32`, so the `ttl = 0` / `swr = 0` precondition
//! violation is unrepresentable in the core: deserializing a zero fails at
//! the boundary, and in-process callers cannot construct one. Validation
//! stays an external collaborator.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Per-query cache options supplied by the caller.
///
/// - `ttl`: seconds the entry is served as fresh.
/// - `swr`: seconds past the fresh window during which the stale entry is
///   still served while a background refresh runs.
/// - `tags`: labels enabling bulk invalidation of every entry sharing them.
///
/// An option set with neither `ttl` nor `swr` is legal: the entry is never
/// served from cache (it classifies as a miss immediately) but is still
/// written, so tag-based invalidation bookkeeping covers it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Fresh window in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<NonZeroU32>,
    /// Stale-while-revalidate window in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swr: Option<NonZeroU32>,
    /// Invalidation tags attached to the write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

impl CacheOptions {
    /// Create an empty option set (no expiry, no tags).
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the fresh window.
    pub fn with_ttl(mut self, ttl: NonZeroU32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the stale-while-revalidate window.
    pub fn with_swr(mut self, swr: NonZeroU32) -> Self {
        self.swr = Some(swr);
        self
    }

    /// Set the invalidation tags.
    pub fn with_tags<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Width of the fresh window in seconds. Zero when `ttl` is absent,
    /// which degenerates swr-only options into "always stale, never fresh".
    pub fn fresh_seconds(&self) -> u64 {
        self.ttl.map_or(0, |ttl| u64::from(ttl.get()))
    }

    /// Whether the entry is eligible for the stale window at all.
    pub fn has_stale_window(&self) -> bool {
        self.swr.is_some()
    }

    /// Total physical TTL applied to the store record: `ttl + swr` when
    /// either is set, `None` when the record should live until explicitly
    /// invalidated.
    pub fn total_ttl(&self) -> Option<u64> {
        if self.ttl.is_none() && self.swr.is_none() {
            return None;
        }
        let swr = self.swr.map_or(0, |swr| u64::from(swr.get()));
        Some(self.fresh_seconds() + swr)
    }
}
