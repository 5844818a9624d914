//! Two-tier cache orchestration.
//!
//! The orchestrator is the only component that writes to the tiers. It runs
//! the read pipeline (memory, then persistence with promotion, then the
//! expiration check) and the write-through save path.
//!
//! # Read Path
//! 1. Memory lookup
//! 2. Persistence lookup; a hit is promoted into memory before continuing
//! 3. Expiration check; an expired record is removed from both tiers and
//!    either served once as stale or reported as a miss
//!
//! # Write Path
//! Memory first, then persistence, replacing any previous record.

use std::collections::BTreeSet;
use std::sync::Arc;

use stash_core::{
    has_expired, Cacheable, Policy, Record, SourceTier, StashConfig, StashResult,
};

use crate::key_lock::KeyLocks;
use crate::lmdb_backend::LmdbPersistence;
use crate::memory::MemoryStore;
use crate::stats::{CacheStats, StatsRecorder};
use crate::store::{PersistentStore, RecordStore};

const DEFAULT_LOCK_STRIPES: usize = 64;

/// Outcome of a cache lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheLookup<T> {
    /// Unexpired record.
    Fresh(Record<T>),
    /// Expired record served once; it has already been removed from both tiers.
    Stale(Record<T>),
    /// Nothing usable; the caller must load.
    Miss,
}

impl<T> CacheLookup<T> {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }

    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// The record for either kind of hit.
    pub fn record(&self) -> Option<&Record<T>> {
        match self {
            Self::Fresh(record) | Self::Stale(record) => Some(record),
            Self::Miss => None,
        }
    }

    pub fn into_record(self) -> Option<Record<T>> {
        match self {
            Self::Fresh(record) | Self::Stale(record) => Some(record),
            Self::Miss => None,
        }
    }
}

/// Orchestrates the memory tier `M` and the persistence tier `P`.
pub struct CacheOrchestrator<M, P>
where
    M: RecordStore,
    P: PersistentStore,
{
    memory: Arc<M>,
    persistence: Arc<P>,
    locks: Arc<KeyLocks>,
    stats: Arc<StatsRecorder>,
}

/// The orchestrator over the stores shipped with this crate.
pub type DefaultOrchestrator = CacheOrchestrator<MemoryStore, LmdbPersistence>;

impl DefaultOrchestrator {
    /// Open a fresh memory tier over the persistence tier in `config`.
    pub fn open(config: &StashConfig) -> StashResult<Self> {
        let persistence = LmdbPersistence::from_config(config)?;
        Ok(Self::new(Arc::new(MemoryStore::new()), Arc::new(persistence))
            .with_lock_stripes(config.lock_stripes))
    }
}

impl<M, P> CacheOrchestrator<M, P>
where
    M: RecordStore,
    P: PersistentStore,
{
    pub fn new(memory: Arc<M>, persistence: Arc<P>) -> Self {
        Self {
            memory,
            persistence,
            locks: Arc::new(KeyLocks::new(DEFAULT_LOCK_STRIPES)),
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    /// Replace the key lock table. Call before sharing the orchestrator.
    pub fn with_lock_stripes(mut self, stripes: usize) -> Self {
        self.locks = Arc::new(KeyLocks::new(stripes));
        self
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    pub(crate) fn recorder(&self) -> &StatsRecorder {
        &self.stats
    }

    /// Look up the record for `policy`.
    ///
    /// Returns `Fresh` for an unexpired record, `Stale` for an expired one when
    /// the policy allows it, and `Miss` otherwise. An expired record is deleted
    /// from both tiers before this returns, so a stale hit is served only once.
    pub async fn get<T: Cacheable>(&self, policy: &Policy<T>) -> StashResult<CacheLookup<T>> {
        let key = policy.key();
        let _guard = self.locks.lock(key).await;

        let record = match self.memory.get::<T>(key, policy.entry_type()).await? {
            Some(mut record) => {
                record.set_source_tier(SourceTier::Memory);
                record
            }
            None => match self.persistence.get::<T>(key, policy.entry_type()).await? {
                Some(mut record) => {
                    record.set_source_tier(SourceTier::Persistence);
                    self.memory.put(key, &record).await?;
                    tracing::debug!(key, "Promoted persistence hit into memory");
                    record
                }
                None => {
                    self.stats.miss();
                    tracing::debug!(key, "Cache miss");
                    return Ok(CacheLookup::Miss);
                }
            },
        };

        if !has_expired(&record, policy) {
            match record.source_tier() {
                SourceTier::Persistence => self.stats.persistence_hit(),
                _ => self.stats.memory_hit(),
            }
            tracing::debug!(key, tier = ?record.source_tier(), "Cache hit");
            return Ok(CacheLookup::Fresh(record));
        }

        self.invalidate_locked(key).await?;
        self.stats.expired_eviction();

        if policy.allows_stale_on_expiry() {
            self.stats.stale_hit();
            tracing::info!(key, tier = ?record.source_tier(), "Serving expired record once");
            Ok(CacheLookup::Stale(record))
        } else {
            self.stats.miss();
            tracing::info!(key, "Evicted expired record");
            Ok(CacheLookup::Miss)
        }
    }

    /// Write `record` through both tiers, replacing any previous record.
    ///
    /// If the persistence write fails the memory write is rolled back, so a
    /// failed save leaves no record behind in either tier.
    pub async fn save<T: Cacheable>(&self, key: &str, record: &Record<T>) -> StashResult<()> {
        let _guard = self.locks.lock(key).await;
        self.memory.put(key, record).await?;

        if let Err(e) = self.persistence.put(key, record).await {
            if let Err(rollback) = self.memory.delete_by_key(key).await {
                tracing::warn!(key, error = %rollback, "Failed to roll back memory write");
            }
            tracing::warn!(key, error = %e, "Persistence write failed, save rolled back");
            return Err(e);
        }

        tracing::debug!(key, "Saved record to both tiers");
        Ok(())
    }

    /// Remove `key` from both tiers. Absent keys are not an error.
    pub async fn delete_by_key(&self, key: &str) -> StashResult<()> {
        let _guard = self.locks.lock(key).await;
        self.invalidate_locked(key).await
    }

    /// Remove every record from both tiers.
    pub async fn delete_all(&self) -> StashResult<()> {
        let _guards = self.locks.lock_all().await;
        self.memory.delete_all().await?;
        self.persistence.delete_all().await?;
        tracing::info!("Cleared both cache tiers");
        Ok(())
    }

    /// Keys present in either tier, sorted and de-duplicated.
    pub async fn all_keys(&self) -> StashResult<Vec<String>> {
        let mut keys: BTreeSet<String> = self.memory.all_keys().await?.into_iter().collect();
        keys.extend(self.persistence.all_keys().await?);
        Ok(keys.into_iter().collect())
    }

    /// Size of the persistence tier in megabytes.
    pub async fn stored_size_mb(&self) -> StashResult<u64> {
        self.persistence.stored_size_mb().await
    }

    /// Delete from both tiers. The caller holds the key's lock.
    async fn invalidate_locked(&self, key: &str) -> StashResult<()> {
        self.memory.delete_by_key(key).await?;
        self.persistence.delete_by_key(key).await?;
        Ok(())
    }
}

impl<M, P> Clone for CacheOrchestrator<M, P>
where
    M: RecordStore,
    P: PersistentStore,
{
    fn clone(&self) -> Self {
        Self {
            memory: Arc::clone(&self.memory),
            persistence: Arc::clone(&self.persistence),
            locks: Arc::clone(&self.locks),
            stats: Arc::clone(&self.stats),
        }
    }
}
