//! Striped per-key locks serialising two-tier mutations.
//!
//! Every key hashes to one of a fixed number of async mutexes. Holding the
//! stripe for a key makes a read-promote-evict sequence or a write-through
//! save atomic with respect to other callers touching the same key.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use tokio::sync::{Mutex, MutexGuard};

pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    /// Create `stripes` locks. Zero is treated as one.
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn stripe_count(&self) -> usize {
        self.stripes.len()
    }

    fn stripe_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }

    /// Lock the stripe owning `key`.
    pub async fn lock(&self, key: &str) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_for(key)].lock().await
    }

    /// Lock every stripe, in index order so concurrent callers cannot deadlock.
    pub async fn lock_all(&self) -> Vec<MutexGuard<'_, ()>> {
        let mut guards = Vec::with_capacity(self.stripes.len());
        for stripe in &self.stripes {
            guards.push(stripe.lock().await);
        }
        guards
    }
}
