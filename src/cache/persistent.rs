//! Persistent tier storage
//!
//! A directory holding `index.json` (schema version plus one timestamped
//! record per key) and one `<key>.bin` file per payload. The index is the
//! timestamp index scanned by expiry; payload files without an index record
//! are orphans and can be pruned. An optional entry/byte bound evicts the
//! least recently accessed entries on write.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

use super::CacheKey;
use crate::error::Result;

/// Current on-disk index schema.
pub const INDEX_SCHEMA_VERSION: &str = "1";

const INDEX_FILE: &str = "index.json";
const PAYLOAD_EXTENSION: &str = "bin";

/// A payload read back from the persistent tier
#[derive(Debug, Clone)]
pub struct PersistedEntry {
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Durable key-value store backing the persistent tier
pub trait PersistentStore: Send {
    /// Read a payload, recording `accessed_at` as its last access
    fn get(
        &mut self,
        key: &CacheKey,
        accessed_at: DateTime<Utc>,
    ) -> Result<Option<PersistedEntry>>;

    fn put(
        &mut self,
        key: &CacheKey,
        payload: &[u8],
        source_url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Returns whether an entry was removed
    fn remove(&mut self, key: &CacheKey) -> Result<bool>;

    fn clear(&mut self) -> Result<()>;

    /// Keys whose timestamp is strictly older than `cutoff`
    fn keys_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<CacheKey>>;

    fn len(&mut self) -> Result<usize>;
}

/// One record in the timestamp index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub created_at: DateTime<Utc>,
    pub size_bytes: u64,
    pub source_url: String,
    /// Absent in indexes written before access tracking
    #[serde(default)]
    pub last_accessed: Option<DateTime<Utc>>,
}

impl IndexRecord {
    /// Eviction order key
    pub fn last_used(&self) -> DateTime<Utc> {
        self.last_accessed.unwrap_or(self.created_at)
    }
}

/// The timestamp index stored as `index.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheIndex {
    pub schema_version: String,
    pub entries: BTreeMap<CacheKey, IndexRecord>,
}

impl Default for CacheIndex {
    fn default() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION.to_string(),
            entries: BTreeMap::new(),
        }
    }
}

/// Directory-backed [`PersistentStore`]
pub struct FileStore {
    dir: PathBuf,
    index: Option<CacheIndex>,
    max_entries: usize,
    max_bytes: u64,
}

impl FileStore {
    /// Open (creating if needed) an unbounded store rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            index: None,
            max_entries: usize::MAX,
            max_bytes: u64::MAX,
        })
    }

    /// Bound the store; writes evict least recently accessed entries
    /// until both limits hold.
    pub fn with_limits(mut self, max_entries: usize, max_bytes: u64) -> Self {
        self.max_entries = max_entries.max(1);
        self.max_bytes = max_bytes;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn payload_path(&self, key: &CacheKey) -> PathBuf {
        self.dir
            .join(format!("{}.{}", key.as_str(), PAYLOAD_EXTENSION))
    }

    /// Load the index from disk, discarding it if it is unreadable JSON or
    /// its schema is unknown. Payloads it referenced become orphans.
    fn read_index(&self) -> Result<CacheIndex> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(CacheIndex::default());
        }

        let content = fs::read_to_string(&path)?;
        let index: CacheIndex = match serde_json::from_str(&content) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Discarding corrupt cache index {}: {}", path.display(), e);
                return Ok(CacheIndex::default());
            }
        };
        if index.schema_version != INDEX_SCHEMA_VERSION {
            log::warn!(
                "Discarding cache index with schema {} (expected {})",
                index.schema_version,
                INDEX_SCHEMA_VERSION
            );
            return Ok(CacheIndex::default());
        }
        Ok(index)
    }

    fn index(&mut self) -> Result<&mut CacheIndex> {
        if self.index.is_none() {
            self.index = Some(self.read_index()?);
        }
        Ok(self.index.get_or_insert_with(CacheIndex::default))
    }

    fn save_index(&mut self) -> Result<()> {
        let path = self.index_path();
        let index = self.index()?;
        let content = serde_json::to_string_pretty(index)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Delete payload files that have no index record. Returns bytes freed.
    pub fn prune_orphans(&mut self) -> Result<u64> {
        let known: Vec<String> = self
            .index()?
            .entries
            .keys()
            .map(|k| k.as_str().to_string())
            .collect();
        let mut bytes_freed = 0;

        for entry in WalkDir::new(&self.dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(PAYLOAD_EXTENSION) {
                continue;
            }
            let stem = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem,
                None => continue,
            };
            if known.iter().any(|k| k == stem) {
                continue;
            }
            if let Ok(metadata) = entry.metadata() {
                bytes_freed += metadata.len();
            }
            fs::remove_file(path)?;
            log::debug!("Pruned orphaned cache payload {}", path.display());
        }

        Ok(bytes_freed)
    }

    /// Total payload bytes recorded in the index.
    pub fn total_bytes(&mut self) -> Result<u64> {
        Ok(self.index()?.entries.values().map(|r| r.size_bytes).sum())
    }

    /// Evict least recently accessed entries other than `keep` until the
    /// limits hold. Returns how many were evicted; the index is not saved.
    fn evict_over_limits(&mut self, keep: &CacheKey) -> Result<usize> {
        let (max_entries, max_bytes) = (self.max_entries, self.max_bytes);
        let mut evicted = 0;
        loop {
            let index = self.index()?;
            let bytes: u64 = index.entries.values().map(|r| r.size_bytes).sum();
            if index.entries.len() <= max_entries && bytes <= max_bytes {
                break;
            }
            let victim = index
                .entries
                .iter()
                .filter(|(key, _)| *key != keep)
                .min_by_key(|(_, record)| record.last_used())
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            index.entries.remove(&victim);

            let path = self.payload_path(&victim);
            if path.exists() {
                fs::remove_file(path)?;
            }
            log::debug!("Evicted {} from persistent cache", victim);
            evicted += 1;
        }
        Ok(evicted)
    }
}

impl PersistentStore for FileStore {
    fn get(
        &mut self,
        key: &CacheKey,
        accessed_at: DateTime<Utc>,
    ) -> Result<Option<PersistedEntry>> {
        let created_at = match self.index()?.entries.get_mut(key) {
            Some(record) => {
                record.last_accessed = Some(accessed_at);
                record.created_at
            }
            None => return Ok(None),
        };

        let path = self.payload_path(key);
        if !path.exists() {
            // Index and payloads disagree; drop the stale record
            self.index()?.entries.remove(key);
            self.save_index()?;
            return Ok(None);
        }

        let payload = fs::read(&path)?;
        self.save_index()?;
        Ok(Some(PersistedEntry {
            payload,
            created_at,
        }))
    }

    fn put(
        &mut self,
        key: &CacheKey,
        payload: &[u8],
        source_url: &str,
        created_at: DateTime<Utc>,
    ) -> Result<()> {
        fs::write(self.payload_path(key), payload)?;
        self.index()?.entries.insert(
            key.clone(),
            IndexRecord {
                created_at,
                size_bytes: payload.len() as u64,
                source_url: source_url.to_string(),
                last_accessed: Some(created_at),
            },
        );
        let evicted = self.evict_over_limits(key)?;
        if evicted > 0 {
            log::info!("Persistent cache over its limits, evicted {} entries", evicted);
        }
        self.save_index()
    }

    fn remove(&mut self, key: &CacheKey) -> Result<bool> {
        let existed = self.index()?.entries.remove(key).is_some();
        let path = self.payload_path(key);
        if path.exists() {
            fs::remove_file(path)?;
        }
        if existed {
            self.save_index()?;
        }
        Ok(existed)
    }

    /// Replaces the index without reading it, then deletes every payload
    fn clear(&mut self) -> Result<()> {
        self.index = Some(CacheIndex::default());
        self.save_index()?;
        self.prune_orphans()?;
        Ok(())
    }

    fn keys_created_before(&mut self, cutoff: DateTime<Utc>) -> Result<Vec<CacheKey>> {
        Ok(self
            .index()?
            .entries
            .iter()
            .filter(|(_, record)| record.created_at < cutoff)
            .map(|(key, _)| key.clone())
            .collect())
    }

    fn len(&mut self) -> Result<usize> {
        Ok(self.index()?.entries.len())
    }
}
