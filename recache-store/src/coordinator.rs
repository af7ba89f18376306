//! Per-query cache coordination.
//!
//! For each query the coordinator computes the fingerprint, classifies the
//! stored entry, and routes: serve (fresh), serve while refreshing in the
//! background (stale), or execute and write back (miss). The caller gets a
//! [`QueryOutcome`] carrying both the result and its status, so concurrent
//! callers never race on shared status state for the per-call answer.
//!
//! The administrative `last_status` / revalidation surface is a single
//! slot per coordinator, overwritten by each call. Callers that need
//! per-call status under concurrency must use the returned outcome; the
//! slot serves sequential callers and diagnostics. This is a documented
//! limitation of the slot, not of the outcome.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;

use recache_core::{
    query_fingerprint, BoxError, CacheEntry, CacheError, CacheOptions, CacheResult, Freshness,
};

use crate::traits::CacheStore;

/// The identity of a read query, as supplied by the host framework.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Model (entity) name, e.g. `User`.
    pub model: String,
    /// Operation name, e.g. `findMany`.
    pub operation: String,
    /// Structured query arguments.
    pub args: Value,
    /// Optional caller identity, so per-caller results cache separately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caller_id: Option<String>,
}

impl QueryRequest {
    /// Create a request without caller identity.
    pub fn new(model: impl Into<String>, operation: impl Into<String>, args: Value) -> Self {
        Self {
            model: model.into(),
            operation: operation.into(),
            args,
            caller_id: None,
        }
    }

    /// Attach a caller identity.
    pub fn with_caller_id(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }
}

/// How the last result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from cache, inside the fresh window.
    Hit,
    /// Served from cache past the fresh window; a background refresh was
    /// started.
    Stale,
    /// Executed against the source of truth and written back.
    Miss,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(formatter, "hit"),
            Self::Stale => write!(formatter, "stale"),
            Self::Miss => write!(formatter, "miss"),
        }
    }
}

/// A query result together with how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    /// Cache status of this call.
    pub status: CacheStatus,
    /// The result returned to the caller.
    pub result: Value,
}

/// Handle to an in-flight (or settled) background revalidation.
///
/// Resolves with the refreshed result once the upstream query completes,
/// even when the subsequent cache write failed (the write is best-effort).
/// Rejects only when the upstream query itself failed.
#[derive(Debug)]
pub struct Revalidation {
    handle: JoinHandle<CacheResult<Value>>,
}

impl Revalidation {
    /// Wait for the refresh to settle.
    pub async fn wait(self) -> CacheResult<Value> {
        match self.handle.await {
            Ok(result) => result,
            Err(err) => Err(CacheError::RevalidationAborted {
                reason: err.to_string(),
            }),
        }
    }

    /// Whether the refresh has already settled.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Orchestrates fingerprinting, freshness classification, background
/// revalidation, and write-back over a shared [`CacheStore`].
///
/// There is no deduplication of overlapping stale refreshes for the same
/// key: each stale classification spawns its own refresh and the last
/// writer wins, both writes representing "the result as of roughly now".
pub struct CacheCoordinator<S> {
    store: Arc<S>,
    last_status: Mutex<Option<CacheStatus>>,
    revalidation: Mutex<Option<Revalidation>>,
}

impl<S: CacheStore + 'static> CacheCoordinator<S> {
    /// Create a coordinator over `store`.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            last_status: Mutex::new(None),
            revalidation: Mutex::new(None),
        }
    }

    /// The shared backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one query through the cache.
    ///
    /// `proceed` executes the query against the source of truth. It is
    /// called at most once per invocation: never on a fresh hit, inline on
    /// a miss, and as the background refresh on a stale serve.
    ///
    /// # Errors
    ///
    /// - [`CacheError::Serialization`] when the query identity cannot be
    ///   fingerprinted.
    /// - [`CacheError::StoreRead`] when the store `get` fails; a read
    ///   outage is fatal to the query rather than silently bypassed.
    /// - [`CacheError::Upstream`] when `proceed` fails on the miss path.
    ///   On the stale path an upstream failure is captured only by the
    ///   revalidation handle; the caller already has the stale value.
    ///
    /// Store write failures never surface here: they are logged and the
    /// result is returned regardless.
    pub async fn execute<F, Fut>(
        &self,
        query: QueryRequest,
        options: CacheOptions,
        proceed: F,
    ) -> CacheResult<QueryOutcome>
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let key = query_fingerprint(
            &query.model,
            &query.operation,
            &query.args,
            query.caller_id.as_deref(),
        )?;

        if let Some(entry) = self.store.get(&key).await? {
            match Freshness::classify(&entry, Utc::now()) {
                Freshness::Fresh => {
                    self.record_status(CacheStatus::Hit);
                    return Ok(QueryOutcome {
                        status: CacheStatus::Hit,
                        result: entry.result,
                    });
                }
                Freshness::Stale => {
                    let revalidation =
                        self.spawn_revalidation(key, query.args, options, proceed);
                    *lock_unpoisoned(&self.revalidation) = Some(revalidation);
                    self.record_status(CacheStatus::Stale);
                    return Ok(QueryOutcome {
                        status: CacheStatus::Stale,
                        result: entry.result,
                    });
                }
                // Logically gone; treated as if no entry existed.
                Freshness::Miss => {}
            }
        }

        let result = proceed(query.args)
            .await
            .map_err(CacheError::upstream)?;

        let entry = CacheEntry::new(result.clone(), options, Utc::now());
        if let Err(err) = self.store.set(&key, entry).await {
            tracing::warn!(key = %key, error = %err, "failed to cache query result");
        }

        self.record_status(CacheStatus::Miss);
        Ok(QueryOutcome {
            status: CacheStatus::Miss,
            result,
        })
    }

    /// Delete every entry referenced by any of `tags`. Returns the number
    /// of entries deleted.
    pub async fn invalidate(&self, tags: &[String]) -> CacheResult<u64> {
        self.store.invalidate(tags).await
    }

    /// Delete every record this cache manages. Returns the number of
    /// records deleted.
    pub async fn invalidate_all(&self) -> CacheResult<u64> {
        self.store.invalidate_all().await
    }

    /// Status of the last result returned by this coordinator, or `None`
    /// if a result has yet to be returned. Single slot: each call
    /// overwrites it.
    pub fn last_status(&self) -> Option<CacheStatus> {
        *lock_unpoisoned(&self.last_status)
    }

    /// Take the handle for the most recent background revalidation, or
    /// `None` if no stale result has been served since the handle was last
    /// taken. Single slot: a newer stale serve replaces an untaken handle.
    pub fn take_revalidation(&self) -> Option<Revalidation> {
        lock_unpoisoned(&self.revalidation).take()
    }

    fn record_status(&self, status: CacheStatus) {
        *lock_unpoisoned(&self.last_status) = Some(status);
    }

    /// Launch the background refresh for a stale serve. The task executes
    /// the query, writes the fresh entry back (best-effort), and settles
    /// the handle with the refreshed result.
    fn spawn_revalidation<F, Fut>(
        &self,
        key: recache_core::CacheKey,
        args: Value,
        options: CacheOptions,
        proceed: F,
    ) -> Revalidation
    where
        F: FnOnce(Value) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let handle = tokio::spawn(async move {
            let result = proceed(args).await.map_err(CacheError::upstream)?;

            let entry = CacheEntry::new(result.clone(), options, Utc::now());
            if let Err(err) = store.set(&key, entry).await {
                tracing::warn!(
                    key = %key,
                    error = %err,
                    "failed to cache revalidated query result"
                );
            }
            Ok(result)
        });
        Revalidation { handle }
    }
}

/// Lock a slot mutex, recovering the guard if a panicking holder poisoned
/// it. The slots hold plain `Option`s with no invariant to break mid-write,
/// so the value is usable either way and status bookkeeping must not be
/// dropped.
fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use recache_core::CacheKey;
    use serde_json::json;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn secs(n: u32) -> NonZeroU32 {
        NonZeroU32::new(n).unwrap()
    }

    /// A tiny "source of truth" the proceed closures read from.
    #[derive(Default)]
    struct Source {
        value: Mutex<Value>,
        calls: AtomicUsize,
    }

    impl Source {
        fn with_value(value: Value) -> Arc<Self> {
            Arc::new(Self {
                value: Mutex::new(value),
                calls: AtomicUsize::new(0),
            })
        }

        fn set_value(&self, value: Value) {
            *self.value.lock().unwrap() = value;
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn proceed_from(
        source: &Arc<Source>,
    ) -> impl FnOnce(Value) -> std::pin::Pin<Box<dyn Future<Output = Result<Value, BoxError>> + Send>>
           + Send
           + 'static {
        let source = Arc::clone(source);
        move |_args| {
            Box::pin(async move {
                source.calls.fetch_add(1, Ordering::SeqCst);
                Ok(source.value.lock().unwrap().clone())
            })
        }
    }

    fn request() -> QueryRequest {
        QueryRequest::new("User", "findMany", json!({"where": {"active": true}}))
    }

    #[tokio::test]
    async fn miss_then_hit_serves_the_cached_value() {
        let coordinator = CacheCoordinator::new(Arc::new(MemoryStore::new()));
        let source = Source::with_value(json!({"name": "before"}));
        let options = CacheOptions::new().with_ttl(secs(60));

        let first = coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(first.status, CacheStatus::Miss);
        assert_eq!(first.result, json!({"name": "before"}));
        assert_eq!(coordinator.last_status(), Some(CacheStatus::Miss));

        // The entity disappears from the source of truth; the cache keeps
        // serving the pre-deletion value inside the fresh window.
        source.set_value(json!(null));

        let second = coordinator
            .execute(request(), options, proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(second.result, json!({"name": "before"}));
        assert_eq!(coordinator.last_status(), Some(CacheStatus::Hit));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn swr_serves_stale_and_revalidates_in_the_background() {
        let coordinator = CacheCoordinator::new(Arc::new(MemoryStore::new()));
        let source = Source::with_value(json!({"v": 1}));
        let options = CacheOptions::new().with_swr(secs(60));

        let first = coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(first.status, CacheStatus::Miss);

        source.set_value(json!({"v": 2}));

        // Zero-width fresh window: the second read is stale, serves the old
        // value, and kicks off exactly one refresh.
        let second = coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(second.status, CacheStatus::Stale);
        assert_eq!(second.result, json!({"v": 1}));
        assert_eq!(coordinator.last_status(), Some(CacheStatus::Stale));

        let revalidation = coordinator.take_revalidation().expect("handle present");
        assert_eq!(revalidation.wait().await.unwrap(), json!({"v": 2}));
        assert_eq!(source.calls(), 2);

        let third = coordinator
            .execute(request(), options, proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(third.result, json!({"v": 2}));
    }

    #[tokio::test]
    async fn fresh_hit_never_calls_proceed() {
        let coordinator = CacheCoordinator::new(Arc::new(MemoryStore::new()));
        let source = Source::with_value(json!(1));
        let options = CacheOptions::new().with_ttl(secs(60));

        coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();
        coordinator
            .execute(request(), options, proceed_from(&source))
            .await
            .unwrap();

        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn untimed_entry_misses_every_time_but_stays_invalidatable() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = CacheCoordinator::new(Arc::clone(&store));
        let source = Source::with_value(json!(1));
        let options = CacheOptions::new().with_tags(["t"]);

        let first = coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(first.status, CacheStatus::Miss);

        let second = coordinator
            .execute(request(), options, proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(second.status, CacheStatus::Miss);
        assert_eq!(source.calls(), 2);

        // The record exists purely for tag bookkeeping.
        assert!(store.has_tag("t"));
        assert_eq!(coordinator.invalidate(&["t".to_string()]).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn miss_path_upstream_failure_propagates_and_caches_nothing() {
        let store = Arc::new(MemoryStore::new());
        let coordinator = CacheCoordinator::new(Arc::clone(&store));
        let options = CacheOptions::new().with_ttl(secs(60));

        let err = coordinator
            .execute(request(), options, |_args| async {
                Err::<Value, BoxError>("database unreachable".into())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Upstream { .. }));
        assert_eq!(store.entry_count(), 0);
        assert_eq!(coordinator.last_status(), None);
    }

    #[tokio::test]
    async fn stale_path_upstream_failure_surfaces_only_via_the_handle() {
        let coordinator = CacheCoordinator::new(Arc::new(MemoryStore::new()));
        let source = Source::with_value(json!("old"));
        let options = CacheOptions::new().with_swr(secs(60));

        coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();

        let stale = coordinator
            .execute(request(), options, |_args| async {
                Err::<Value, BoxError>("refresh exploded".into())
            })
            .await
            .unwrap();
        assert_eq!(stale.status, CacheStatus::Stale);
        assert_eq!(stale.result, json!("old"));

        let err = coordinator
            .take_revalidation()
            .expect("handle present")
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Upstream { .. }));
    }

    /// Store whose writes can be made to fail, to exercise the
    /// best-effort write paths.
    struct FlakyStore {
        inner: MemoryStore,
        fail_writes: AtomicBool,
    }

    impl FlakyStore {
        fn new() -> Self {
            Self {
                inner: MemoryStore::new(),
                fail_writes: AtomicBool::new(false),
            }
        }
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn get(&self, key: &CacheKey) -> CacheResult<Option<CacheEntry>> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &CacheKey, entry: CacheEntry) -> CacheResult<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(CacheError::store_write("disk full"));
            }
            self.inner.set(key, entry).await
        }

        async fn invalidate(&self, tags: &[String]) -> CacheResult<u64> {
            self.inner.invalidate(tags).await
        }

        async fn invalidate_all(&self) -> CacheResult<u64> {
            self.inner.invalidate_all().await
        }
    }

    #[tokio::test]
    async fn write_failures_never_fail_the_read_path() {
        let store = Arc::new(FlakyStore::new());
        let coordinator = CacheCoordinator::new(Arc::clone(&store));
        let source = Source::with_value(json!("old"));
        let options = CacheOptions::new().with_swr(secs(60));

        coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();

        store.fail_writes.store(true, Ordering::SeqCst);
        source.set_value(json!("new"));

        // Stale serve: the caller still gets the old value, and the
        // revalidation handle resolves with the refreshed result even
        // though the write-back was dropped.
        let stale = coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(stale.result, json!("old"));

        let refreshed = coordinator
            .take_revalidation()
            .expect("handle present")
            .wait()
            .await
            .unwrap();
        assert_eq!(refreshed, json!("new"));

        // The dropped write left the old entry in place.
        let after = coordinator
            .execute(request(), options, proceed_from(&source))
            .await
            .unwrap();
        assert_eq!(after.result, json!("old"));
    }

    #[tokio::test]
    async fn a_new_stale_serve_replaces_an_untaken_handle() {
        let coordinator = CacheCoordinator::new(Arc::new(MemoryStore::new()));
        let source = Source::with_value(json!(0));
        let options = CacheOptions::new().with_swr(secs(60));

        coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();

        coordinator
            .execute(request(), options.clone(), proceed_from(&source))
            .await
            .unwrap();
        coordinator
            .execute(request(), options, proceed_from(&source))
            .await
            .unwrap();

        // Two stale serves happened; only the most recent handle remains.
        assert!(coordinator.take_revalidation().is_some());
        assert!(coordinator.take_revalidation().is_none());
    }

    #[test]
    fn status_slot_survives_a_poisoned_lock() {
        let slot = Arc::new(Mutex::new(Some(CacheStatus::Hit)));

        let poisoner = Arc::clone(&slot);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("holder dies with the lock held");
        })
        .join();
        assert!(slot.is_poisoned());

        *lock_unpoisoned(&slot) = Some(CacheStatus::Miss);
        assert_eq!(*lock_unpoisoned(&slot), Some(CacheStatus::Miss));
    }

    #[tokio::test]
    async fn caller_identity_partitions_the_cache() {
        let coordinator = CacheCoordinator::new(Arc::new(MemoryStore::new()));
        let options = CacheOptions::new().with_ttl(secs(60));

        let for_alice = coordinator
            .execute(
                request().with_caller_id("alice"),
                options.clone(),
                |_args| async { Ok::<_, BoxError>(json!("alice's rows")) },
            )
            .await
            .unwrap();
        assert_eq!(for_alice.status, CacheStatus::Miss);

        let for_bob = coordinator
            .execute(request().with_caller_id("bob"), options, |_args| async {
                Ok::<_, BoxError>(json!("bob's rows"))
            })
            .await
            .unwrap();
        assert_eq!(for_bob.status, CacheStatus::Miss);
        assert_eq!(for_bob.result, json!("bob's rows"));
    }
}
