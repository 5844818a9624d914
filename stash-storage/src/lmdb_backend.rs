//! LMDB-backed persistence tier.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep records in a
//! memory-mapped, crash-safe key-value store that survives restarts.
//!
//! # Record Format
//!
//! LMDB keys are the cache keys as UTF-8 when they fit the environment's
//! maximum key size, and `sha256:<hex digest>` of the cache key otherwise.
//! Values are laid out as:
//! - Bytes 0-7: `created_at` as Unix milliseconds (i64, little endian)
//! - Bytes 8-11: length of the cache key (u32, little endian)
//! - Next `len` bytes: the cache key as UTF-8
//! - Remaining bytes: JSON envelope `{"entry_type": ..., "payload": ...}`
//!
//! The cache key travels with the value, so `all_keys` reports original keys
//! and a digest collision reads as a miss. The entry type is checked before
//! the payload is decoded, so reading a key with the wrong payload type fails
//! with a type mismatch instead of a codec error.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Every `put` and `delete_by_key` is one
//! write transaction, so readers see either the old record or the new one.

use std::borrow::Cow;
use std::path::Path;

use async_trait::async_trait;
use chrono::DateTime;
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use stash_core::{
    Cacheable, EntryType, Record, StashConfig, StashError, StashResult, StoreError, Timestamp,
};

use crate::store::{PersistentStore, RecordStore};

const TIER: &str = "persistence";
const TIMESTAMP_LEN: usize = 8;
const KEY_LEN_LEN: usize = 4;
const HEADER_LEN: usize = TIMESTAMP_LEN + KEY_LEN_LEN;
const HASHED_KEY_PREFIX: &str = "sha256:";
const BYTES_PER_MB: u64 = 1024 * 1024;

/// Error type for LMDB persistence operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::Backend {
            tier: TIER.to_string(),
            reason: e.to_string(),
        }
    }
}

impl From<LmdbStoreError> for StashError {
    fn from(e: LmdbStoreError) -> Self {
        StashError::Store(e.into())
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a, T> {
    entry_type: &'a str,
    payload: &'a T,
}

#[derive(Deserialize)]
struct EnvelopeHeader {
    entry_type: String,
}

#[derive(Deserialize)]
struct Envelope<T> {
    payload: T,
}

/// Fixed header of a stored value.
struct ValueHeader<'a> {
    created_at: Timestamp,
    key: &'a str,
    json: &'a [u8],
}

impl<'a> ValueHeader<'a> {
    fn parse(storage_key: &str, bytes: &'a [u8]) -> Result<Self, StoreError> {
        let corrupted = |reason: String| StoreError::Corrupted {
            key: storage_key.to_string(),
            reason,
        };

        if bytes.len() < HEADER_LEN {
            return Err(corrupted(format!(
                "record is {} bytes, shorter than its header",
                bytes.len()
            )));
        }

        let (timestamp_bytes, rest) = bytes.split_at(TIMESTAMP_LEN);
        let (key_len_bytes, rest) = rest.split_at(KEY_LEN_LEN);

        let timestamp_bytes: [u8; TIMESTAMP_LEN] = timestamp_bytes
            .try_into()
            .map_err(|_| corrupted("invalid timestamp header".to_string()))?;
        let millis = i64::from_le_bytes(timestamp_bytes);
        let created_at = DateTime::from_timestamp_millis(millis)
            .ok_or_else(|| corrupted(format!("timestamp {} out of range", millis)))?;

        let key_len_bytes: [u8; KEY_LEN_LEN] = key_len_bytes
            .try_into()
            .map_err(|_| corrupted("invalid key length header".to_string()))?;
        let key_len = u32::from_le_bytes(key_len_bytes) as usize;
        if rest.len() < key_len {
            return Err(corrupted(format!(
                "key length {} exceeds remaining {} bytes",
                key_len,
                rest.len()
            )));
        }

        let (key_bytes, json) = rest.split_at(key_len);
        let key = std::str::from_utf8(key_bytes)
            .map_err(|e| corrupted(format!("key is not UTF-8: {}", e)))?;

        Ok(Self {
            created_at,
            key,
            json,
        })
    }
}

/// Durable key→record store on LMDB.
///
/// # Example
///
/// ```ignore
/// let store = LmdbPersistence::open("/var/cache/stash", 256)?;
/// store.put("user:1", &Record::new("Alice".to_string())).await?;
/// let record = store.get::<String>("user:1", &EntryType::of::<String>()).await?;
/// ```
pub struct LmdbPersistence {
    env: Env,
    db: Database<Str, Bytes>,
    max_key_size: usize,
}

impl LmdbPersistence {
    /// Open (or create) the persistence tier.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let max_key_size = env.max_key_size();

        tracing::info!(
            path = %path.as_ref().display(),
            max_size_mb,
            max_key_size,
            "Opened LMDB persistence tier"
        );

        Ok(Self {
            env,
            db,
            max_key_size,
        })
    }

    /// Open the persistence tier described by `config`.
    pub fn from_config(config: &StashConfig) -> StashResult<Self> {
        config.validate()?;
        Ok(Self::open(&config.persistence_path, config.map_size_mb)?)
    }

    /// LMDB key for `key`: the key itself if it fits, its SHA-256 digest otherwise.
    fn storage_key<'k>(&self, key: &'k str) -> Cow<'k, str> {
        if key.len() <= self.max_key_size {
            return Cow::Borrowed(key);
        }
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        Cow::Owned(format!("{}{}", HASHED_KEY_PREFIX, hex::encode(hasher.finalize())))
    }

    fn encode<T: Cacheable>(key: &str, record: &Record<T>) -> Result<Vec<u8>, StoreError> {
        let entry_type = EntryType::of::<T>();
        let envelope = EnvelopeRef {
            entry_type: entry_type.name(),
            payload: record.payload(),
        };
        let json = serde_json::to_vec(&envelope).map_err(|e| StoreError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        let key_len = u32::try_from(key.len()).map_err(|_| StoreError::Serialization {
            key: key.to_string(),
            reason: format!("key of {} bytes is too long", key.len()),
        })?;

        let mut bytes = Vec::with_capacity(HEADER_LEN + key.len() + json.len());
        bytes.extend_from_slice(&record.created_at().timestamp_millis().to_le_bytes());
        bytes.extend_from_slice(&key_len.to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes.extend_from_slice(&json);
        Ok(bytes)
    }

    /// Decode the value stored for `key`. A value written for a different
    /// cache key under the same digest reads as absent.
    fn decode<T: Cacheable>(
        key: &str,
        entry_type: &EntryType,
        bytes: &[u8],
    ) -> Result<Option<Record<T>>, StoreError> {
        let header = ValueHeader::parse(key, bytes)?;
        if header.key != key {
            return Ok(None);
        }

        let envelope_header: EnvelopeHeader =
            serde_json::from_slice(header.json).map_err(|e| StoreError::Deserialization {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        if envelope_header.entry_type != entry_type.name() {
            return Err(StoreError::TypeMismatch {
                key: key.to_string(),
                expected: entry_type.to_string(),
                found: envelope_header.entry_type,
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_slice(header.json).map_err(|e| StoreError::Deserialization {
                key: key.to_string(),
                reason: e.to_string(),
            })?;

        Ok(Some(Record::with_created_at(envelope.payload, header.created_at)))
    }
}

#[async_trait]
impl RecordStore for LmdbPersistence {
    fn tier_name(&self) -> &'static str {
        TIER
    }

    async fn get<T: Cacheable>(
        &self,
        key: &str,
        entry_type: &EntryType,
    ) -> StashResult<Option<Record<T>>> {
        let storage_key = self.storage_key(key);
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let bytes = self
            .db
            .get(&rtxn, &storage_key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        match bytes {
            Some(bytes) => Ok(Self::decode(key, entry_type, bytes)?),
            None => Ok(None),
        }
    }

    async fn put<T: Cacheable>(&self, key: &str, record: &Record<T>) -> StashResult<()> {
        let bytes = Self::encode(key, record)?;
        let storage_key = self.storage_key(key);

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .put(&mut wtxn, &storage_key, &bytes)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn delete_by_key(&self, key: &str) -> StashResult<()> {
        let storage_key = self.storage_key(key);
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        // Only delete what was written for this exact key.
        let owned = match self
            .db
            .get(&wtxn, &storage_key)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?
        {
            Some(bytes) => ValueHeader::parse(&storage_key, bytes)
                .map(|header| header.key == key)
                .unwrap_or(true),
            None => false,
        };

        if owned {
            self.db
                .delete(&mut wtxn, &storage_key)
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn delete_all(&self) -> StashResult<()> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        self.db
            .clear(&mut wtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(())
    }

    async fn all_keys(&self) -> StashResult<Vec<String>> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut keys = Vec::new();
        for entry in iter {
            let (storage_key, value) =
                entry.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            keys.push(ValueHeader::parse(storage_key, value)?.key.to_string());
        }
        Ok(keys)
    }
}

#[async_trait]
impl PersistentStore for LmdbPersistence {
    async fn stored_size_mb(&self) -> StashResult<u64> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut total_bytes = 0u64;
        for entry in iter {
            let (key, value) = entry.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            total_bytes += (key.len() + value.len()) as u64;
        }
        Ok(total_bytes / BYTES_PER_MB)
    }
}
