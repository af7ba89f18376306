//! recache core - query cache data types
//!
//! Pure data structures and leaf logic with no I/O. The store and
//! coordinator crates depend on this.
//!
//! This crate contains the pieces of the cache that can be reasoned about
//! in isolation: the typed cache options, the stored entry format, the
//! deterministic query fingerprint, the freshness classification, and the
//! error taxonomy shared by every backend.

use chrono::{DateTime, Utc};

pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod freshness;
pub mod options;

pub use entry::CacheEntry;
pub use error::{BoxError, CacheError, CacheResult};
pub use fingerprint::{query_fingerprint, CacheKey};
pub use freshness::Freshness;
pub use options::CacheOptions;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
