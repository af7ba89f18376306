//! Error types for cache operations.

use thiserror::Error;

/// Boxed error produced by the host's `proceed` function.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type for all cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Cache layer errors.
///
/// Precondition violations (e.g. `ttl = 0`) are not represented here: they
/// are rejected at the boundary before the core runs, either by the type
/// system ([`CacheOptions`](crate::CacheOptions) uses `NonZeroU32` windows)
/// or by serde when deserializing caller-supplied options.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The query identity could not be canonicalized into a fingerprint.
    /// Aborts the query.
    #[error("failed to serialize cache key input for {target}: {reason}")]
    Serialization { target: String, reason: String },

    /// The backing store failed while reading an entry. Propagated rather
    /// than degraded to a miss, so a store outage stays observable instead
    /// of masquerading as a cold cache.
    #[error("cache store read failed: {reason}")]
    StoreRead { reason: String },

    /// The backing store failed while writing an entry or updating the tag
    /// index. Always recovered locally: logged, never surfaced to the read
    /// path.
    #[error("cache store write failed: {reason}")]
    StoreWrite { reason: String },

    /// The backing store could not be set up (bad URL, pool creation
    /// failure).
    #[error("cache store unavailable: {reason}")]
    StoreUnavailable { reason: String },

    /// The host's `proceed` function failed. Propagated as-is on the miss
    /// path; captured only by the revalidation handle on the stale path.
    #[error("query execution failed: {source}")]
    Upstream {
        #[source]
        source: BoxError,
    },

    /// The background revalidation task was cancelled or panicked before
    /// producing a result.
    #[error("background revalidation aborted: {reason}")]
    RevalidationAborted { reason: String },
}

impl CacheError {
    /// Build a [`CacheError::Serialization`] for the given query identity.
    ///
    /// The target is rendered as `model.operation` with the model's first
    /// letter lowercased, matching how host frameworks typically name
    /// query endpoints (`user.findMany`, not `User.findMany`).
    pub fn serialization(
        model: &str,
        operation: &str,
        reason: impl std::fmt::Display,
    ) -> Self {
        Self::Serialization {
            target: format!("{}.{}", lower_case_first(model), operation),
            reason: reason.to_string(),
        }
    }

    /// Build a [`CacheError::StoreRead`].
    pub fn store_read(reason: impl std::fmt::Display) -> Self {
        Self::StoreRead {
            reason: reason.to_string(),
        }
    }

    /// Build a [`CacheError::StoreWrite`].
    pub fn store_write(reason: impl std::fmt::Display) -> Self {
        Self::StoreWrite {
            reason: reason.to_string(),
        }
    }

    /// Build a [`CacheError::Upstream`] from the host's error.
    pub fn upstream(source: BoxError) -> Self {
        Self::Upstream { source }
    }
}

fn lower_case_first(input: &str) -> String {
    let mut chars = input.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialization_error_names_the_query_endpoint() {
        let err = CacheError::serialization("User", "findMany", "cyclic value");
        assert_eq!(
            err.to_string(),
            "failed to serialize cache key input for user.findMany: cyclic value"
        );
    }

    #[test]
    fn lower_case_first_handles_empty_and_unicode() {
        assert_eq!(lower_case_first(""), "");
        assert_eq!(lower_case_first("Post"), "post");
        assert_eq!(lower_case_first("Ärende"), "ärende");
    }

    #[test]
    fn store_errors_carry_reasons() {
        assert_eq!(
            CacheError::store_read("connection refused").to_string(),
            "cache store read failed: connection refused"
        );
        assert_eq!(
            CacheError::store_write("OOM").to_string(),
            "cache store write failed: OOM"
        );
    }
}
