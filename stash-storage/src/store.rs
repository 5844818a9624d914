//! Store contracts shared by the memory and persistence tiers.
//!
//! Both tiers map string keys to [`Record`]s. The orchestrator is the only
//! writer; implementations must make each `put`/`delete_by_key` a single
//! atomic step so no reader ever sees a half-written record.

use async_trait::async_trait;
use stash_core::{Cacheable, EntryType, Record, StashResult};

/// Key→record map implemented by every tier.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Short name used in logs and errors.
    fn tier_name(&self) -> &'static str;

    /// Get the record stored under `key`.
    ///
    /// `entry_type` describes the payload the caller expects. A stored record
    /// of a different type is reported as `StoreError::TypeMismatch`.
    async fn get<T: Cacheable>(
        &self,
        key: &str,
        entry_type: &EntryType,
    ) -> StashResult<Option<Record<T>>>;

    /// Store `record` under `key`, replacing any previous record.
    async fn put<T: Cacheable>(&self, key: &str, record: &Record<T>) -> StashResult<()>;

    /// Delete the record under `key`. Deleting an absent key is a no-op.
    async fn delete_by_key(&self, key: &str) -> StashResult<()>;

    /// Delete every record in this tier.
    async fn delete_all(&self) -> StashResult<()>;

    /// Keys of all records currently stored.
    async fn all_keys(&self) -> StashResult<Vec<String>>;
}

/// Durable tier: a [`RecordStore`] that survives restarts and reports its size.
#[async_trait]
pub trait PersistentStore: RecordStore {
    /// Accumulated size of stored records in whole megabytes.
    async fn stored_size_mb(&self) -> StashResult<u64>;
}
