//! Configuration types

use crate::error::{ConfigError, StashError, StashResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime configuration for a STASH cache instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StashConfig {
    /// Directory holding the persistence tier's files.
    pub persistence_path: PathBuf,
    /// Upper bound for the persistence map in megabytes.
    pub map_size_mb: usize,
    /// Number of lock stripes guarding two-tier mutations.
    pub lock_stripes: usize,
    /// Collapse concurrent loads of the same key into one loader call.
    pub deduplicate_loads: bool,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            persistence_path: std::env::temp_dir().join("stash"),
            map_size_mb: 256,
            lock_stripes: 64,
            deduplicate_loads: false,
        }
    }
}

impl StashConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `STASH_PERSISTENCE_PATH`: persistence directory (default: `$TMPDIR/stash`)
    /// - `STASH_MAP_SIZE_MB`: persistence map size (default: 256)
    /// - `STASH_LOCK_STRIPES`: lock stripe count (default: 64)
    /// - `STASH_DEDUPLICATE_LOADS`: `true`/`1` enables in-flight de-duplication (default: off)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            persistence_path: std::env::var("STASH_PERSISTENCE_PATH")
                .ok()
                .map(PathBuf::from)
                .unwrap_or(defaults.persistence_path),
            map_size_mb: std::env::var("STASH_MAP_SIZE_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.map_size_mb),
            lock_stripes: std::env::var("STASH_LOCK_STRIPES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.lock_stripes),
            deduplicate_loads: std::env::var("STASH_DEDUPLICATE_LOADS")
                .map(|s| s == "true" || s == "1")
                .unwrap_or(defaults.deduplicate_loads),
        }
    }

    pub fn with_persistence_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistence_path = path.into();
        self
    }

    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    pub fn with_lock_stripes(mut self, lock_stripes: usize) -> Self {
        self.lock_stripes = lock_stripes;
        self
    }

    pub fn with_deduplicated_loads(mut self, enabled: bool) -> Self {
        self.deduplicate_loads = enabled;
        self
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(StashError::Config) if invalid.
    pub fn validate(&self) -> StashResult<()> {
        if self.persistence_path.as_os_str().is_empty() {
            return Err(StashError::Config(ConfigError::MissingRequired {
                field: "persistence_path".to_string(),
            }));
        }

        if self.map_size_mb == 0 {
            return Err(StashError::Config(ConfigError::InvalidValue {
                field: "map_size_mb".to_string(),
                value: self.map_size_mb.to_string(),
                reason: "map_size_mb must be greater than 0".to_string(),
            }));
        }

        if self.lock_stripes == 0 {
            return Err(StashError::Config(ConfigError::InvalidValue {
                field: "lock_stripes".to_string(),
                value: self.lock_stripes.to_string(),
                reason: "lock_stripes must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = StashConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.deduplicate_loads);
    }

    #[test]
    fn test_zero_map_size_rejected() {
        let config = StashConfig::default().with_map_size_mb(0);
        match config.validate() {
            Err(StashError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "map_size_mb")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_lock_stripes_rejected() {
        let config = StashConfig::default().with_lock_stripes(0);
        assert!(matches!(
            config.validate(),
            Err(StashError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_empty_path_rejected() {
        let config = StashConfig::default().with_persistence_path("");
        assert!(matches!(
            config.validate(),
            Err(StashError::Config(ConfigError::MissingRequired { .. }))
        ));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = StashConfig::default()
            .with_persistence_path("/var/cache/stash")
            .with_deduplicated_loads(true);
        let json = serde_json::to_string(&config).expect("serialize config");
        let back: StashConfig = serde_json::from_str(&json).expect("deserialize config");
        assert_eq!(config, back);
    }
}
