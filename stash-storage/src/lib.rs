//! STASH Storage - Cache Tiers, Orchestrator and Loader Wrapper
//!
//! A two-tier result cache: a volatile [`MemoryStore`] in front of a durable
//! [`LmdbPersistence`] store.
//!
//! - [`RecordStore`] / [`PersistentStore`]: the tier contracts
//! - [`CacheOrchestrator`]: lookup with promotion and expiry, write-through save
//! - [`CachedLoader`]: wraps a policy's loader with the cache
//!
//! Records and policies come from `stash-core`.

pub mod key_lock;
pub mod lmdb_backend;
pub mod loader;
pub mod memory;
pub mod orchestrator;
pub mod stats;
pub mod store;

pub use key_lock::KeyLocks;
pub use lmdb_backend::{LmdbPersistence, LmdbStoreError};
pub use loader::CachedLoader;
pub use memory::MemoryStore;
pub use orchestrator::{CacheLookup, CacheOrchestrator, DefaultOrchestrator};
pub use stats::CacheStats;
pub use store::{PersistentStore, RecordStore};
