//! Deterministic query fingerprinting.
//!
//! A query's identity (model, operation, arguments, caller identity) is
//! canonicalized into an order-independent JSON form and reduced to a
//! compact key with a fast non-cryptographic hash. Logically identical
//! inputs always produce the same key regardless of how the caller's maps
//! happened to be ordered.
//!
//! Canonicalization relies on `serde_json` compiled without its
//! `preserve_order` feature: JSON objects are backed by a `BTreeMap`, so
//! serializing a `Value` always emits keys in sorted order.
//!
//! Two semantically different queries can in principle collide on the same
//! 64-bit key; stored entries are not re-checked against the request on
//! read. This mirrors the compact-hash design the fingerprint inherits.

use std::fmt;
use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use twox_hash::XxHash64;

use crate::error::{CacheError, CacheResult};

/// An opaque cache key derived from a query's identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an already-computed key string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self(key.to_owned())
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// The canonical identity record that gets hashed. Field order is fixed by
/// the struct; map ordering inside `args` is fixed by canonicalization.
#[derive(Serialize)]
struct QueryIdentity<'a> {
    model: &'a str,
    operation: &'a str,
    args: &'a serde_json::Value,
    caller_id: Option<&'a str>,
}

/// Compute the deterministic cache key for a query.
///
/// # Errors
///
/// Returns [`CacheError::Serialization`] when `args` cannot be
/// canonicalized (non-string map keys, non-finite floats, values that are
/// not plain data).
pub fn query_fingerprint<A: Serialize>(
    model: &str,
    operation: &str,
    args: &A,
    caller_id: Option<&str>,
) -> CacheResult<CacheKey> {
    // to_value first: this sorts every nested map, making the byte stream
    // independent of the caller's insertion order.
    let args = serde_json::to_value(args)
        .map_err(|err| CacheError::serialization(model, operation, err))?;

    let identity = QueryIdentity {
        model,
        operation,
        args: &args,
        caller_id,
    };
    let bytes = serde_json::to_vec(&identity)
        .map_err(|err| CacheError::serialization(model, operation, err))?;

    let mut hasher = XxHash64::with_seed(0);
    hasher.write(&bytes);
    Ok(CacheKey(format!("{:016x}", hasher.finish())))
}
