//! Cached records and the tier they were served from.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Where a record was found (or produced) on its latest retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceTier {
    /// Served from the in-process memory tier.
    Memory,
    /// Served from the durable persistence tier.
    Persistence,
    /// Produced by the loader on this call.
    Fresh,
}

/// A cached payload plus the metadata the orchestrator needs.
///
/// `created_at` is fixed when the record is constructed and survives every
/// copy between tiers. `source_tier` is re-tagged on each retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<T> {
    payload: T,
    created_at: Timestamp,
    source_tier: SourceTier,
}

impl<T> Record<T> {
    /// A record freshly produced by a loader, stamped with the current time.
    pub fn new(payload: T) -> Self {
        Self::with_created_at(payload, Utc::now())
    }

    /// A record with an explicit creation time.
    ///
    /// Stores use this when rehydrating a record; tests use it to simulate age.
    pub fn with_created_at(payload: T, created_at: Timestamp) -> Self {
        Self {
            payload,
            created_at,
            source_tier: SourceTier::Fresh,
        }
    }

    pub fn payload(&self) -> &T {
        &self.payload
    }

    pub fn into_payload(self) -> T {
        self.payload
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn source_tier(&self) -> SourceTier {
        self.source_tier
    }

    /// Tag the tier this record was retrieved from.
    pub fn set_source_tier(&mut self, tier: SourceTier) {
        self.source_tier = tier;
    }

    /// Age of the record relative to `now`. Future timestamps count as zero.
    pub fn age_at(&self, now: Timestamp) -> Duration {
        now.signed_duration_since(self.created_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Map the payload while keeping timestamp and tier.
    pub fn map<U, F>(self, f: F) -> Record<U>
    where
        F: FnOnce(T) -> U,
    {
        Record {
            payload: f(self.payload),
            created_at: self.created_at,
            source_tier: self.source_tier,
        }
    }
}
