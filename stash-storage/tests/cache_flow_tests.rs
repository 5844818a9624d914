//! End-to-end cache flows over a real LMDB directory.

use stash_core::{EntryType, OperationDescriptor, OperationId, PolicyRegistry};
use stash_storage::{CacheOrchestrator, CachedLoader, DefaultOrchestrator, MemoryStore};
use stash_test_utils::assertions::{
    assert_backend_error, assert_fresh, assert_loader_failed, assert_miss, assert_stale,
};
use stash_test_utils::fixtures::{
    aged_record, expiring_policy, orchestrator_over, temp_config, temp_orchestrator,
};
use stash_test_utils::generators::Profile;
use stash_test_utils::{
    init_test_tracing, CountingLoader, FailingPersistence, Policy, Record, RecordStore,
    SourceTier,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const MINUTE: Duration = Duration::from_secs(60);
const PAST_MINUTE: Duration = Duration::from_secs(61);

#[tokio::test]
async fn user_lookup_loads_once_and_reloads_after_expiry() {
    init_test_tracing();
    let (orchestrator, _dir) = temp_orchestrator();
    let loader = CachedLoader::new(orchestrator.clone());
    let counter = CountingLoader::new();
    let policy = expiring_policy("user:1", MINUTE, false, counter.returning("Alice".to_string()));

    assert_eq!(loader.wrap(&policy).await.expect("cold wrap"), "Alice");
    assert_eq!(counter.calls(), 1);

    assert_eq!(loader.wrap(&policy).await.expect("warm wrap"), "Alice");
    assert_eq!(counter.calls(), 1);

    // Stand in for 61 seconds passing.
    orchestrator
        .save("user:1", &aged_record("Alice".to_string(), PAST_MINUTE))
        .await
        .expect("backdate record");

    assert_eq!(loader.wrap(&policy).await.expect("expired wrap"), "Alice");
    assert_eq!(counter.calls(), 2);

    let record = assert_fresh(orchestrator.get(&policy).await.expect("get"));
    assert!(record.age_at(chrono::Utc::now()) < MINUTE);
}

#[tokio::test]
async fn records_survive_restart_and_promote() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let config = temp_config(&dir);
    let counter = CountingLoader::new();
    let profile = Profile {
        name: "Alice".to_string(),
        age: 30,
        tags: vec!["admin".to_string()],
        scores: BTreeMap::from([("chess".to_string(), 1800)]),
    };
    let policy = expiring_policy("profile:1", MINUTE, false, counter.returning(profile.clone()));

    {
        let orchestrator = DefaultOrchestrator::open(&config).expect("open");
        let loaded = CachedLoader::new(orchestrator).wrap(&policy).await.expect("wrap");
        assert_eq!(loaded, profile);
    }

    let orchestrator = DefaultOrchestrator::open(&config).expect("reopen");
    assert!(orchestrator.memory().is_empty());

    let record = assert_fresh(orchestrator.get(&policy).await.expect("get"));
    assert_eq!(record.source_tier(), SourceTier::Persistence);
    assert_eq!(record.payload(), &profile);
    assert!(orchestrator.memory().contains_key("profile:1"));

    let record = assert_fresh(orchestrator.get(&policy).await.expect("get"));
    assert_eq!(record.source_tier(), SourceTier::Memory);
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn stale_persistence_record_is_served_once() {
    let (orchestrator, _dir) = temp_orchestrator();
    orchestrator
        .persistence()
        .put("feed:1", &aged_record(vec![1u32, 2, 3], PAST_MINUTE))
        .await
        .expect("put");

    let counter = CountingLoader::new();
    let policy = expiring_policy("feed:1", MINUTE, true, counter.returning(vec![9u32]));

    let stale = assert_stale(orchestrator.get(&policy).await.expect("get"));
    assert_eq!(stale.payload(), &vec![1, 2, 3]);
    assert_eq!(stale.source_tier(), SourceTier::Persistence);
    assert!(orchestrator.all_keys().await.expect("keys").is_empty());

    assert_miss(&orchestrator.get(&policy).await.expect("get"));
    assert_eq!(counter.calls(), 0);
}

#[tokio::test]
async fn invalidation_forces_reload() {
    let (orchestrator, _dir) = temp_orchestrator();
    let loader = CachedLoader::new(orchestrator.clone());
    let counter = CountingLoader::new();
    let policy = expiring_policy("user:1", MINUTE, true, counter.returning(7u64));

    loader.wrap(&policy).await.expect("wrap");
    orchestrator.delete_by_key("user:1").await.expect("delete");
    orchestrator.delete_by_key("user:1").await.expect("repeat delete");
    loader.wrap(&policy).await.expect("wrap");
    assert_eq!(counter.calls(), 2);

    orchestrator.delete_all().await.expect("delete_all");
    loader.wrap(&policy).await.expect("wrap");
    assert_eq!(counter.calls(), 3);
}

#[tokio::test]
async fn last_save_wins() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let config = temp_config(&dir);
    let counter = CountingLoader::new();
    let policy = expiring_policy("k", MINUTE, false, counter.returning(0i32));
    let first = aged_record(1i32, Duration::from_secs(30));
    let second = Record::new(2i32);

    {
        let orchestrator = DefaultOrchestrator::open(&config).expect("open");
        orchestrator.save("k", &first).await.expect("save");
        orchestrator.save("k", &second).await.expect("save");

        let record = assert_fresh(orchestrator.get(&policy).await.expect("get"));
        assert_eq!(*record.payload(), 2);
        assert_eq!(record.created_at(), second.created_at());
    }

    let orchestrator = DefaultOrchestrator::open(&config).expect("reopen");
    let persisted = orchestrator
        .persistence()
        .get::<i32>("k", &EntryType::of::<i32>())
        .await
        .expect("persistence get")
        .expect("record should be persisted");
    assert_eq!(*persisted.payload(), 2);
    assert_eq!(
        persisted.created_at().timestamp_millis(),
        second.created_at().timestamp_millis()
    );
    assert_ne!(
        persisted.created_at().timestamp_millis(),
        first.created_at().timestamp_millis()
    );
    assert_eq!(orchestrator.all_keys().await.expect("keys"), vec!["k".to_string()]);
}

#[tokio::test]
async fn loader_failure_is_surfaced_and_not_cached() {
    let (orchestrator, _dir) = temp_orchestrator();
    let loader = CachedLoader::new(orchestrator.clone());
    let counter = CountingLoader::new();
    let policy: Policy<String> =
        expiring_policy("user:1", MINUTE, false, counter.failing("upstream down"));

    assert_loader_failed(&loader.wrap(&policy).await, "user:1");
    assert_loader_failed(&loader.wrap(&policy).await, "user:1");
    assert_eq!(counter.calls(), 2);
    assert!(orchestrator.all_keys().await.expect("keys").is_empty());
}

#[tokio::test]
async fn persistence_read_failure_propagates() {
    let orchestrator = orchestrator_over(FailingPersistence::new("disk gone"));
    let loader = CachedLoader::new(orchestrator.clone());
    let counter = CountingLoader::new();
    let policy = expiring_policy("user:1", MINUTE, false, counter.returning(1u8));

    assert_backend_error(&orchestrator.get(&policy).await);
    assert_backend_error(&loader.wrap(&policy).await);
    assert_backend_error(&orchestrator.all_keys().await);
    assert_eq!(counter.calls(), 0);
}

#[tokio::test]
async fn persistence_write_failure_propagates_from_wrap() {
    let orchestrator: CacheOrchestrator<MemoryStore, FailingPersistence> =
        orchestrator_over(FailingPersistence::writes_only("read-only volume"));
    let loader = CachedLoader::new(orchestrator.clone());
    let counter = CountingLoader::new();
    let policy = expiring_policy("user:1", MINUTE, false, counter.returning(1u8));

    assert_backend_error(&loader.wrap(&policy).await);
    assert_eq!(counter.calls(), 1);
    assert_eq!(orchestrator.stats().loads, 1);

    // The failed save leaves nothing behind in memory.
    assert!(orchestrator.memory().is_empty());
    assert_miss(&orchestrator.get(&policy).await.expect("get"));
    assert_backend_error(&orchestrator.save("user:1", &Record::new(2u8)).await);
    assert!(!orchestrator.memory().contains_key("user:1"));
}

#[tokio::test]
async fn long_keys_load_once_and_survive_restart() {
    let dir = TempDir::new().expect("TempDir creation should succeed");
    let config = temp_config(&dir);
    let key = format!("search:{}", "q".repeat(600));
    let counter = CountingLoader::new();
    let policy = expiring_policy(&key, MINUTE, false, counter.returning(vec![1u32, 2]));

    {
        let orchestrator = DefaultOrchestrator::open(&config).expect("open");
        let loader = CachedLoader::new(orchestrator);
        assert_eq!(loader.wrap(&policy).await.expect("wrap"), vec![1, 2]);
    }

    let orchestrator = DefaultOrchestrator::open(&config).expect("reopen");
    assert_eq!(orchestrator.all_keys().await.expect("keys"), vec![key.clone()]);
    let record = assert_fresh(orchestrator.get(&policy).await.expect("get"));
    assert_eq!(record.source_tier(), SourceTier::Persistence);
    assert_eq!(record.payload(), &vec![1, 2]);
    assert_eq!(counter.calls(), 1);
}

#[tokio::test]
async fn registered_operation_drives_the_cache() {
    let (orchestrator, _dir) = temp_orchestrator();
    let loader = CachedLoader::new(orchestrator);
    let registry = PolicyRegistry::new();
    let counter = CountingLoader::new();
    let op = OperationId::new("UserRepository", "find_user");
    let fetch_user = counter.returning("Alice".to_string());

    registry
        .register(
            op.clone(),
            &OperationDescriptor::default()
                .with_key("user:1")
                .with_lifetime(MINUTE)
                .expirable(),
            move || fetch_user(),
        )
        .expect("register");

    let policy: Arc<Policy<String>> = registry.resolve(&op).expect("resolve");
    assert_eq!(loader.wrap(&policy).await.expect("wrap"), "Alice");
    assert_eq!(loader.wrap(&policy).await.expect("wrap"), "Alice");
    assert_eq!(counter.calls(), 1);
}
