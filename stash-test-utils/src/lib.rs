//! STASH Test Utilities
//!
//! Centralized test infrastructure for the STASH workspace:
//! - Counting and failing loaders
//! - A persistence tier that fails on demand
//! - Proptest generators for keys, payloads and policies
//! - Test fixtures for temporary LMDB-backed orchestrators
//! - Custom assertions for cache lookups and errors

// Re-export core types for convenience
pub use stash_core::{
    has_expired, has_expired_at, BoxError, Cacheable, ConfigError, EntryType, Loader,
    LoaderError, LoaderFuture, Policy, Record, SourceTier, StashConfig, StashError, StashResult,
    StoreError, Timestamp,
};
pub use stash_storage::{
    CacheLookup, CacheOrchestrator, CachedLoader, DefaultOrchestrator, LmdbPersistence,
    MemoryStore, PersistentStore, RecordStore,
};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::{self, FutureExt};

// ============================================================================
// MOCK LOADERS AND STORES
// ============================================================================

/// Hands out loaders that count how often they are invoked.
///
/// Every loader created from one `CountingLoader` shares its counter.
#[derive(Debug, Clone, Default)]
pub struct CountingLoader {
    calls: Arc<AtomicUsize>,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invocations so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Loader that always succeeds with a clone of `value`.
    pub fn returning<T: Cacheable>(&self, value: T) -> Loader<T> {
        let calls = Arc::clone(&self.calls);
        Arc::new(move || -> LoaderFuture<T> {
            calls.fetch_add(1, Ordering::SeqCst);
            future::ready(Ok(value.clone())).boxed()
        })
    }

    /// Loader that always fails with `reason`.
    pub fn failing<T: Cacheable>(&self, reason: &str) -> Loader<T> {
        let calls = Arc::clone(&self.calls);
        let reason = reason.to_string();
        Arc::new(move || -> LoaderFuture<T> {
            calls.fetch_add(1, Ordering::SeqCst);
            let err: BoxError = reason.clone().into();
            future::ready(Err(err)).boxed()
        })
    }
}

/// Persistence tier whose operations fail with `StoreError::Backend`.
#[derive(Debug, Clone)]
pub struct FailingPersistence {
    reason: String,
    fail_reads: bool,
}

impl FailingPersistence {
    /// Every operation fails.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fail_reads: true,
        }
    }

    /// Reads behave like an empty store, writes fail.
    pub fn writes_only(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            fail_reads: false,
        }
    }

    fn error(&self) -> StashError {
        StoreError::Backend {
            tier: "persistence".to_string(),
            reason: self.reason.clone(),
        }
        .into()
    }
}

#[async_trait]
impl RecordStore for FailingPersistence {
    fn tier_name(&self) -> &'static str {
        "persistence"
    }

    async fn get<T: Cacheable>(
        &self,
        _key: &str,
        _entry_type: &EntryType,
    ) -> StashResult<Option<Record<T>>> {
        if self.fail_reads {
            return Err(self.error());
        }
        Ok(None)
    }

    async fn put<T: Cacheable>(&self, _key: &str, _record: &Record<T>) -> StashResult<()> {
        Err(self.error())
    }

    async fn delete_by_key(&self, _key: &str) -> StashResult<()> {
        Err(self.error())
    }

    async fn delete_all(&self) -> StashResult<()> {
        Err(self.error())
    }

    async fn all_keys(&self) -> StashResult<Vec<String>> {
        if self.fail_reads {
            return Err(self.error());
        }
        Ok(Vec::new())
    }
}

#[async_trait]
impl PersistentStore for FailingPersistence {
    async fn stored_size_mb(&self) -> StashResult<u64> {
        if self.fail_reads {
            return Err(self.error());
        }
        Ok(0)
    }
}

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating cache keys, payloads and policies.

    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use std::collections::BTreeMap;
    use std::time::Duration;

    /// Structured payload exercising nested collections through the codec.
    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    pub struct Profile {
        pub name: String,
        pub age: u32,
        pub tags: Vec<String>,
        pub scores: BTreeMap<String, i64>,
    }

    /// Generate a non-empty cache key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-z]{1,8}:[0-9]{1,4}"
    }

    /// Generate a Profile payload.
    pub fn arb_profile() -> impl Strategy<Value = Profile> {
        (
            "[A-Za-z ]{0,16}",
            any::<u32>(),
            prop::collection::vec("[a-z]{0,6}", 0..4),
            prop::collection::btree_map("[a-z]{1,6}", any::<i64>(), 0..4),
        )
            .prop_map(|(name, age, tags, scores)| Profile {
                name,
                age,
                tags,
                scores,
            })
    }

    /// Generate a TTL between one second and one day.
    pub fn arb_ttl() -> impl Strategy<Value = Duration> {
        (1u64..86_400).prop_map(Duration::from_secs)
    }

    /// Generate an age strictly below `ttl`, leaving a one second margin.
    pub fn arb_age_within(ttl: Duration) -> impl Strategy<Value = Duration> {
        let max = ttl.as_secs().saturating_sub(1);
        (0..=max).prop_map(Duration::from_secs)
    }

    /// Generate `(expirable, allow_stale_on_expiry)` flag pairs.
    pub fn arb_policy_flags() -> impl Strategy<Value = (bool, bool)> {
        (any::<bool>(), any::<bool>())
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use chrono::Utc;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Config pointing at `dir` with a small map and few stripes.
    pub fn temp_config(dir: &TempDir) -> StashConfig {
        StashConfig::default()
            .with_persistence_path(dir.path())
            .with_map_size_mb(16)
            .with_lock_stripes(8)
    }

    /// Orchestrator over a fresh LMDB directory. Keep the `TempDir` alive.
    pub fn temp_orchestrator() -> (DefaultOrchestrator, TempDir) {
        let dir = TempDir::new().expect("TempDir creation should succeed");
        let orchestrator =
            DefaultOrchestrator::open(&temp_config(&dir)).expect("orchestrator should open");
        (orchestrator, dir)
    }

    /// Orchestrator whose persistence tier is `persistence`.
    pub fn orchestrator_over<P: PersistentStore>(
        persistence: P,
    ) -> CacheOrchestrator<MemoryStore, P> {
        CacheOrchestrator::new(Arc::new(MemoryStore::new()), Arc::new(persistence))
    }

    /// Record created `age` ago.
    pub fn aged_record<T>(payload: T, age: Duration) -> Record<T> {
        let age = chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero());
        Record::with_created_at(payload, Utc::now() - age)
    }

    /// Expirable policy for `key` with `ttl` and the given loader.
    pub fn expiring_policy<T: Cacheable>(
        key: &str,
        ttl: Duration,
        allow_stale: bool,
        loader: Loader<T>,
    ) -> Policy<T> {
        Policy::builder(key)
            .ttl(ttl)
            .expirable(true)
            .allow_stale_on_expiry(allow_stale)
            .shared_loader(loader)
            .build()
            .expect("policy should build")
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for STASH-specific validation.

    use super::*;
    use std::fmt::Debug;

    /// Assert a fresh hit and return its record.
    #[track_caller]
    pub fn assert_fresh<T: Debug>(lookup: CacheLookup<T>) -> Record<T> {
        match lookup {
            CacheLookup::Fresh(record) => record,
            other => panic!("Expected Fresh, got: {:?}", other),
        }
    }

    /// Assert a stale hit and return its record.
    #[track_caller]
    pub fn assert_stale<T: Debug>(lookup: CacheLookup<T>) -> Record<T> {
        match lookup {
            CacheLookup::Stale(record) => record,
            other => panic!("Expected Stale, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_miss<T: Debug>(lookup: &CacheLookup<T>) {
        assert!(lookup.is_miss(), "Expected Miss, got: {:?}", lookup);
    }

    /// Assert a loader failure for `key`.
    #[track_caller]
    pub fn assert_loader_failed<T: Debug>(result: &StashResult<T>, key: &str) {
        match result {
            Err(StashError::Loader(LoaderError::Failed { key: k, .. })) => {
                assert_eq!(k, key, "Wrong key in loader failure");
            }
            other => panic!("Expected loader failure for {}, got: {:?}", key, other),
        }
    }

    /// Assert a backend failure from the persistence tier.
    #[track_caller]
    pub fn assert_backend_error<T: Debug>(result: &StashResult<T>) {
        match result {
            Err(StashError::Store(StoreError::Backend { tier, .. })) => {
                assert_eq!(tier, "persistence");
            }
            other => panic!("Expected persistence backend error, got: {:?}", other),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
