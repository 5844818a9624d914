//! In-process memory tier.
//!
//! Payloads are kept as type-erased `Arc<dyn Any>` values so one map can hold
//! records of every operation. Nothing is serialized; a lookup clones the
//! payload out of its slot.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use stash_core::{Cacheable, EntryType, Record, StashResult, StoreError, Timestamp};

use crate::store::RecordStore;

struct MemorySlot {
    created_at: Timestamp,
    entry_type: EntryType,
    payload: Arc<dyn Any + Send + Sync>,
}

/// Volatile key→record map living for the lifetime of the process.
#[derive(Default)]
pub struct MemoryStore {
    slots: RwLock<HashMap<String, MemorySlot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.slots.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a record exists under `key`, whatever its type.
    pub fn contains_key(&self, key: &str) -> bool {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(key)
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    fn tier_name(&self) -> &'static str {
        "memory"
    }

    async fn get<T: Cacheable>(
        &self,
        key: &str,
        entry_type: &EntryType,
    ) -> StashResult<Option<Record<T>>> {
        let slots = self.slots.read().map_err(|_| StoreError::LockPoisoned)?;
        let Some(slot) = slots.get(key) else {
            return Ok(None);
        };

        let payload = slot.payload.downcast_ref::<T>().ok_or_else(|| {
            StoreError::TypeMismatch {
                key: key.to_string(),
                expected: entry_type.to_string(),
                found: slot.entry_type.to_string(),
            }
        })?;

        Ok(Some(Record::with_created_at(payload.clone(), slot.created_at)))
    }

    async fn put<T: Cacheable>(&self, key: &str, record: &Record<T>) -> StashResult<()> {
        let slot = MemorySlot {
            created_at: record.created_at(),
            entry_type: EntryType::of::<T>(),
            payload: Arc::new(record.payload().clone()),
        };

        self.slots
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .insert(key.to_string(), slot);
        Ok(())
    }

    async fn delete_by_key(&self, key: &str) -> StashResult<()> {
        self.slots
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .remove(key);
        Ok(())
    }

    async fn delete_all(&self) -> StashResult<()> {
        self.slots
            .write()
            .map_err(|_| StoreError::LockPoisoned)?
            .clear();
        Ok(())
    }

    async fn all_keys(&self) -> StashResult<Vec<String>> {
        let slots = self.slots.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(slots.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stash_core::{SourceTier, StashError};

    #[tokio::test]
    async fn test_put_and_get() {
        let store = MemoryStore::new();
        let created_at = Utc::now() - chrono::Duration::seconds(10);
        let record = Record::with_created_at("Alice".to_string(), created_at);

        store.put("user:1", &record).await.expect("put should succeed");

        let cached = store
            .get::<String>("user:1", &EntryType::of::<String>())
            .await
            .expect("get should succeed")
            .expect("record should exist");
        assert_eq!(cached.payload(), "Alice");
        assert_eq!(cached.created_at(), created_at);
        assert_eq!(cached.source_tier(), SourceTier::Fresh);
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let store = MemoryStore::new();
        let cached = store
            .get::<String>("missing", &EntryType::of::<String>())
            .await
            .expect("get should succeed");
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let store = MemoryStore::new();
        store
            .put("count", &Record::new(3u64))
            .await
            .expect("put should succeed");

        let result = store
            .get::<String>("count", &EntryType::of::<String>())
            .await;
        match result {
            Err(StashError::Store(StoreError::TypeMismatch { found, .. })) => {
                assert_eq!(found, "u64")
            }
            other => panic!("expected TypeMismatch, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_overwrite() {
        let store = MemoryStore::new();
        store.put("k", &Record::new(1u32)).await.expect("put should succeed");
        store.put("k", &Record::new(2u32)).await.expect("put should succeed");

        let cached = store
            .get::<u32>("k", &EntryType::of::<u32>())
            .await
            .expect("get should succeed")
            .expect("record should exist");
        assert_eq!(*cached.payload(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::new();
        store.put("k", &Record::new(1u32)).await.expect("put should succeed");

        store.delete_by_key("k").await.expect("delete should succeed");
        store.delete_by_key("k").await.expect("second delete should succeed");
        store.delete_by_key("never-there").await.expect("absent delete should succeed");
        assert!(!store.contains_key("k"));
    }

    #[tokio::test]
    async fn test_delete_all_and_keys() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store
                .put(&i.to_string(), &Record::new(i))
                .await
                .expect("put should succeed");
        }
        assert_eq!(store.all_keys().await.expect("keys").len(), 10);

        store.delete_all().await.expect("delete_all should succeed");
        assert!(store.all_keys().await.expect("keys").is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_len_and_contains_key_after_poisoned_lock() {
        let store = Arc::new(MemoryStore::new());
        store
            .put("k", &Record::new(1u8))
            .await
            .expect("put should succeed");

        let poisoner = Arc::clone(&store);
        let result = std::thread::spawn(move || {
            let _slots = poisoner.slots.write().expect("write lock");
            panic!("poison the memory tier lock");
        })
        .join();
        assert!(result.is_err());
        assert!(store.slots.is_poisoned());

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
        assert!(store.contains_key("k"));
        assert!(!store.contains_key("missing"));
    }
}
