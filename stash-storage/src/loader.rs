//! Read-through wrapping of a policy's loader.
//!
//! [`CachedLoader::wrap`] returns the cached payload on any hit, fresh or
//! stale. On a miss it runs the loader once, saves the result through both
//! tiers and returns it. Loader failures are surfaced and nothing is cached.
//!
//! With deduplication enabled, concurrent misses on the same key share one
//! load: later callers wait for the first and re-check the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use stash_core::{Cacheable, LoaderError, Policy, Record, StashConfig, StashResult};
use tokio::sync::Mutex as AsyncMutex;

use crate::orchestrator::CacheOrchestrator;
use crate::store::{PersistentStore, RecordStore};

/// Per-key gates for in-flight loads.
#[derive(Default)]
struct InFlightLoads {
    gates: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl InFlightLoads {
    fn lease(&self, key: &str) -> GateLease<'_> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        let gate = Arc::clone(gates.entry(key.to_string()).or_default());
        GateLease {
            loads: self,
            key: key.to_string(),
            gate: Some(gate),
        }
    }

    /// Drop the map entry once nobody else holds or waits on the gate.
    fn release(&self, key: &str, gate: Arc<AsyncMutex<()>>) {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        drop(gate);
        if gates.get(key).is_some_and(|g| Arc::strong_count(g) == 1) {
            gates.remove(key);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.gates.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

struct GateLease<'a> {
    loads: &'a InFlightLoads,
    key: String,
    gate: Option<Arc<AsyncMutex<()>>>,
}

impl GateLease<'_> {
    fn gate(&self) -> Arc<AsyncMutex<()>> {
        self.gate.clone().unwrap_or_default()
    }
}

impl Drop for GateLease<'_> {
    fn drop(&mut self) {
        if let Some(gate) = self.gate.take() {
            self.loads.release(&self.key, gate);
        }
    }
}

/// Wraps loaders with the cache held by a [`CacheOrchestrator`].
pub struct CachedLoader<M, P>
where
    M: RecordStore,
    P: PersistentStore,
{
    orchestrator: CacheOrchestrator<M, P>,
    in_flight: Option<Arc<InFlightLoads>>,
}

impl<M, P> CachedLoader<M, P>
where
    M: RecordStore,
    P: PersistentStore,
{
    /// Concurrent misses on one key each run the loader.
    pub fn new(orchestrator: CacheOrchestrator<M, P>) -> Self {
        Self {
            orchestrator,
            in_flight: None,
        }
    }

    /// Concurrent misses on one key share a single load.
    pub fn with_deduplication(orchestrator: CacheOrchestrator<M, P>) -> Self {
        Self {
            orchestrator,
            in_flight: Some(Arc::new(InFlightLoads::default())),
        }
    }

    pub fn from_config(orchestrator: CacheOrchestrator<M, P>, config: &StashConfig) -> Self {
        if config.deduplicate_loads {
            Self::with_deduplication(orchestrator)
        } else {
            Self::new(orchestrator)
        }
    }

    pub fn orchestrator(&self) -> &CacheOrchestrator<M, P> {
        &self.orchestrator
    }

    pub fn deduplicates(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Return the cached payload for `policy`, loading and saving it on a miss.
    pub async fn wrap<T: Cacheable>(&self, policy: &Policy<T>) -> StashResult<T> {
        if let Some(record) = self.orchestrator.get(policy).await?.into_record() {
            return Ok(record.into_payload());
        }

        let Some(in_flight) = &self.in_flight else {
            return self.load_and_save(policy).await;
        };

        let lease = in_flight.lease(policy.key());
        let _permit = lease.gate().lock_owned().await;

        // Another caller may have filled the cache while we waited.
        if let Some(record) = self.orchestrator.get(policy).await?.into_record() {
            return Ok(record.into_payload());
        }
        self.load_and_save(policy).await
    }

    async fn load_and_save<T: Cacheable>(&self, policy: &Policy<T>) -> StashResult<T> {
        let key = policy.key();
        match policy.load().await {
            Ok(payload) => {
                self.orchestrator.recorder().load();
                let record = Record::new(payload);
                self.orchestrator.save(key, &record).await?;
                tracing::debug!(key, "Loaded and cached fresh record");
                Ok(record.into_payload())
            }
            Err(e) => {
                self.orchestrator.recorder().load_failure();
                tracing::warn!(key, error = %e, "Loader failed; nothing cached");
                Err(LoaderError::failed(key, e).into())
            }
        }
    }
}

impl<M, P> Clone for CachedLoader<M, P>
where
    M: RecordStore,
    P: PersistentStore,
{
    fn clone(&self) -> Self {
        Self {
            orchestrator: self.orchestrator.clone(),
            in_flight: self.in_flight.clone(),
        }
    }
}
