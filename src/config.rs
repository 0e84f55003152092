//! Engine configuration
//!
//! All tunables live in one serde struct so a host can ship them as a
//! JSON file. Every field has a default; a partial file is valid.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StemsyncError};

/// Default maximum drift between handles before a correction, in seconds.
pub const DEFAULT_DRIFT_THRESHOLD_SECS: f64 = 0.1;

/// Default number of payloads kept in the memory tier.
pub const DEFAULT_MEMORY_CAPACITY: usize = 20;

/// Default age after which persistent entries are invalid.
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Payloads above this size are never cached (50 MiB).
pub const DEFAULT_MAX_CACHEABLE_BYTES: u64 = 50 * 1024 * 1024;

/// Tempo used when neither an override nor a detection is available.
pub const DEFAULT_BPM: f64 = 120.0;

/// Initial per-stem volume.
pub const DEFAULT_STEM_VOLUME: f32 = 0.85;

/// Persistent tier entry bound.
pub const DEFAULT_PERSISTENT_MAX_ENTRIES: usize = 100;

/// Persistent tier size bound (500 MiB).
pub const DEFAULT_PERSISTENT_MAX_BYTES: u64 = 500 * 1024 * 1024;

/// Tolerance before the end of the session at which playback is considered finished.
pub const DEFAULT_END_TOLERANCE_SECS: f64 = 0.1;

/// Nominal display refresh rate.
pub const DEFAULT_REFRESH_HZ: f64 = 60.0;

/// Tunable engine parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest tolerated spread of handle positions, in seconds
    pub drift_threshold_secs: f64,
    /// Memory tier capacity in entries
    pub memory_cache_capacity: usize,
    /// Persistent tier time-to-live in days
    pub persistent_ttl_days: i64,
    /// Largest payload accepted by the cache, in bytes
    pub max_cacheable_bytes: u64,
    /// Entries kept in the persistent tier before eviction
    pub persistent_max_entries: usize,
    /// Total payload bytes kept in the persistent tier before eviction
    pub persistent_max_bytes: u64,
    /// Fallback tempo
    pub default_bpm: f64,
    /// Initial volume for new stems
    pub default_stem_volume: f32,
    /// End-of-session tolerance, in seconds
    pub end_tolerance_secs: f64,
    /// Expected refresh rate before any frame has been measured
    pub refresh_hz: f64,
    /// Directory of the persistent tier; `None` keeps the cache memory-only
    pub cache_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            drift_threshold_secs: DEFAULT_DRIFT_THRESHOLD_SECS,
            memory_cache_capacity: DEFAULT_MEMORY_CAPACITY,
            persistent_ttl_days: DEFAULT_TTL_DAYS,
            max_cacheable_bytes: DEFAULT_MAX_CACHEABLE_BYTES,
            persistent_max_entries: DEFAULT_PERSISTENT_MAX_ENTRIES,
            persistent_max_bytes: DEFAULT_PERSISTENT_MAX_BYTES,
            default_bpm: DEFAULT_BPM,
            default_stem_volume: DEFAULT_STEM_VOLUME,
            end_tolerance_secs: DEFAULT_END_TOLERANCE_SECS,
            refresh_hz: DEFAULT_REFRESH_HZ,
            cache_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        log::debug!("Loaded engine config from {}", path.display());
        Ok(config)
    }

    /// Write the configuration as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Persistent tier TTL as a duration.
    pub fn ttl(&self) -> Duration {
        Duration::days(self.persistent_ttl_days)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| {
            Err(StemsyncError::InvalidConfig {
                reason: reason.to_string(),
            })
        };

        if !(self.drift_threshold_secs > 0.0) {
            return invalid("drift_threshold_secs must be positive");
        }
        if self.memory_cache_capacity == 0 {
            return invalid("memory_cache_capacity must be at least 1");
        }
        if self.persistent_ttl_days <= 0 {
            return invalid("persistent_ttl_days must be positive");
        }
        if self.persistent_max_entries == 0 || self.persistent_max_bytes == 0 {
            return invalid("persistent cache limits must be positive");
        }
        if !(self.default_bpm > 0.0) {
            return invalid("default_bpm must be positive");
        }
        if !(0.0..=1.0).contains(&self.default_stem_volume) {
            return invalid("default_stem_volume must be within [0, 1]");
        }
        if self.end_tolerance_secs < 0.0 {
            return invalid("end_tolerance_secs must not be negative");
        }
        if !(self.refresh_hz > 0.0) {
            return invalid("refresh_hz must be positive");
        }
        Ok(())
    }
}
