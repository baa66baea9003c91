//! Durable TTL cache of registry results
//!
//! The whole store is loaded into memory at startup and written back in
//! batches. Each flush replaces the file atomically, so a crash loses at
//! most the entries put since the last flush.

use crate::cache::entry::{CacheEntry, RegistryInfo};
use crate::error::{EnrichError, EnrichResult};
use crate::fsutil;
use crate::key::CacheKey;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Current on-disk format version
const CACHE_FORMAT_VERSION: u32 = 1;

/// On-disk representation of the store
#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    entries: BTreeMap<CacheKey, CacheEntry>,
}

/// Result of a cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Present and younger than the TTL
    Fresh(CacheEntry),
    /// Present but expired; kept until the next successful lookup overwrites it
    Stale(CacheEntry),
    Missing,
}

impl CacheLookup {
    /// A hit requires presence and freshness
    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Fresh(_))
    }

    /// The stored entry, fresh or not
    pub fn entry(&self) -> Option<&CacheEntry> {
        match self {
            Self::Fresh(entry) | Self::Stale(entry) => Some(entry),
            Self::Missing => None,
        }
    }

    /// The entry if it may be served
    pub fn into_fresh(self) -> Option<CacheEntry> {
        match self {
            Self::Fresh(entry) => Some(entry),
            _ => None,
        }
    }
}

/// Entry counts by freshness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total: usize,
    pub fresh: usize,
    pub stale: usize,
}

/// Durable key → registry result store with age-based validity
pub struct CacheStore {
    path: PathBuf,
    ttl: Duration,
    flush_every: usize,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    /// Mutations since the last successful flush
    pending: AtomicUsize,
    /// Serializes flushes; never held together with `entries`
    flush_lock: Mutex<()>,
}

impl CacheStore {
    /// Open the store at `path`, loading any persisted entries.
    ///
    /// An unreadable or corrupt file is treated as a cold cache. A corrupt
    /// file is moved aside to `<file>.corrupt` so the next flush does not
    /// destroy it.
    pub async fn open(path: impl Into<PathBuf>, ttl: Duration, flush_every: usize) -> Self {
        let path = path.into();
        let entries = match Self::load(&path).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("{}; starting with a cold cache", e);
                HashMap::new()
            }
        };

        debug!(entries = entries.len(), path = %path.display(), "Opened cache store");

        Self {
            path,
            ttl,
            flush_every: flush_every.max(1),
            entries: RwLock::new(entries),
            pending: AtomicUsize::new(0),
            flush_lock: Mutex::new(()),
        }
    }

    async fn load(path: &Path) -> EnrichResult<HashMap<CacheKey, CacheEntry>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(e) => {
                return Err(EnrichError::CacheUnavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        match serde_json::from_str::<CacheFile>(&content) {
            Ok(file) if file.version == CACHE_FORMAT_VERSION => {
                Ok(file.entries.into_iter().collect())
            }
            Ok(file) => Err(EnrichError::CacheUnavailable {
                path: path.to_path_buf(),
                reason: format!("unsupported format version {}", file.version),
            }),
            Err(e) => {
                let mut aside = path.as_os_str().to_owned();
                aside.push(".corrupt");
                let aside = PathBuf::from(aside);
                if let Err(rename_err) = fs::rename(path, &aside).await {
                    warn!("Failed to move corrupt cache aside: {}", rename_err);
                } else {
                    info!("Moved corrupt cache file to {}", aside.display());
                }
                Err(EnrichError::CacheUnavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<CacheKey, CacheEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configured time-to-live
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fail unless the store's directory accepts writes
    pub async fn ensure_writable(&self) -> EnrichResult<()> {
        fsutil::ensure_writable(&self.path)
            .await
            .map_err(|e| EnrichError::CachePersist {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Look up `key` against the current time
    pub fn get(&self, key: &CacheKey) -> CacheLookup {
        self.get_at(key, Utc::now())
    }

    /// Look up `key` as of `now`. Stale entries are reported, never removed.
    pub fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> CacheLookup {
        let entries = self.read();
        match entries.get(key) {
            Some(entry) if entry.is_fresh_at(now, self.ttl) => CacheLookup::Fresh(entry.clone()),
            Some(entry) => CacheLookup::Stale(entry.clone()),
            None => CacheLookup::Missing,
        }
    }

    /// Upsert the result for `key`, stamping it with the current time
    pub fn put(&self, key: CacheKey, info: RegistryInfo) -> CacheEntry {
        let entry = CacheEntry::new(info);
        self.insert(key, entry.clone());
        entry
    }

    pub(crate) fn insert(&self, key: CacheKey, entry: CacheEntry) {
        self.write().insert(key, entry);
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    /// Number of stored entries, fresh or stale
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Count entries by freshness
    pub fn stats(&self) -> CacheStats {
        let now = Utc::now();
        let entries = self.read();
        let fresh = entries
            .values()
            .filter(|e| e.is_fresh_at(now, self.ttl))
            .count();
        CacheStats {
            total: entries.len(),
            fresh,
            stale: entries.len() - fresh,
        }
    }

    /// Remove every entry (persisted at the next flush)
    pub fn clear(&self) {
        let mut entries = self.write();
        let removed = entries.len();
        entries.clear();
        self.pending.fetch_add(removed.max(1), Ordering::AcqRel);
    }

    /// Whether there are unflushed mutations
    pub fn is_dirty(&self) -> bool {
        self.pending.load(Ordering::Acquire) > 0
    }

    /// Whether enough puts accumulated to warrant a batch flush
    pub fn flush_due(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.flush_every
    }

    /// Persist the store if it has unflushed mutations.
    pub async fn flush(&self) -> EnrichResult<()> {
        let _guard = self.flush_lock.lock().await;

        let pending = self.pending.swap(0, Ordering::AcqRel);
        if pending == 0 {
            return Ok(());
        }

        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            entries: self
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };
        let count = file.entries.len();

        let result = match serde_json::to_vec(&file) {
            Ok(content) => fsutil::atomic_write(&self.path, &content)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(reason) = result {
            // Keep the mutations counted so a later flush retries them
            self.pending.fetch_add(pending, Ordering::AcqRel);
            return Err(EnrichError::CachePersist {
                path: self.path.clone(),
                reason,
            });
        }

        debug!(entries = count, flushed = pending, "Flushed cache store");
        Ok(())
    }

    /// Flush when a batch is due; failures are logged and retried later
    pub async fn flush_if_due(&self) {
        if self.flush_due() {
            if let Err(e) = self.flush().await {
                warn!("Periodic cache flush failed: {}", e);
            }
        }
    }
}
