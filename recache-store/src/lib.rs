//! Cache store layer with explicit freshness and tag invalidation.
//!
//! This crate provides everything between a query and its backing
//! key-value store:
//!
//! - [`CacheStore`], the contract any backend must satisfy
//! - [`KeySpace`], the reserved key namespace shared by all backends
//! - the tag-set TTL policy and in-memory [`TagIndex`]
//! - [`MemoryStore`], an in-process backend
//! - [`RedisStore`], the networked reference backend with two
//!   semantically equivalent invalidation strategies
//! - [`CacheCoordinator`], the per-query state machine
//!
//! # Design Philosophy
//!
//! The coordinator never hides staleness. Each call is classified as a
//! hit, a stale serve, or a miss, the classification is returned with the
//! result, and a stale serve leaves behind an observable revalidation
//! handle instead of silently mutating the cache.
//!
//! # Example
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let coordinator = CacheCoordinator::new(store);
//!
//! let options = CacheOptions::new()
//!     .with_ttl(NonZeroU32::new(60).unwrap())
//!     .with_tags(["user:1"]);
//!
//! let outcome = coordinator
//!     .execute(
//!         QueryRequest::new("User", "findUnique", json!({"id": 1})),
//!         options,
//!         |args| async move { run_query(args).await },
//!     )
//!     .await?;
//!
//! assert_eq!(outcome.status, CacheStatus::Miss);
//! ```

pub mod coordinator;
pub mod keyspace;
pub mod memory;
pub mod redis_store;
pub mod tag_index;
pub mod traits;

pub use coordinator::{CacheCoordinator, CacheStatus, QueryOutcome, QueryRequest, Revalidation};
pub use keyspace::KeySpace;
pub use memory::MemoryStore;
pub use redis_store::{InvalidationStrategy, RedisStore, RedisStoreConfig};
pub use tag_index::{next_tag_expiry, TagIndex};
pub use traits::CacheStore;
