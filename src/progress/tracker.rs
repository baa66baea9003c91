//! Durable, resumable progress tracking
//!
//! The tracker owns the run's `ProgressState`. Mutations take a std mutex
//! for the in-memory update only; persistence snapshots under that mutex
//! and writes after releasing it.
//!
//! A key is only marked after its lookup result was put into the cache, and
//! periodic flushes write the cache before the progress snapshot. A crash
//! can therefore lose markings but never leave a processed key whose result
//! exists nowhere on disk.

use crate::cache::CacheStore;
use crate::error::{EnrichError, EnrichResult};
use crate::fsutil;
use crate::key::CacheKey;
use crate::progress::state::ProgressState;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::fs;
use tracing::{debug, info, warn};

/// Default number of new markings between periodic flushes
pub const DEFAULT_FLUSH_EVERY: usize = 50;

/// Tracks which keys a run has processed and persists it
pub struct ProgressTracker {
    path: PathBuf,
    flush_every: usize,
    worker_count: usize,
    throttle_rate: u32,
    state: Mutex<ProgressState>,
    /// New markings since the last flush
    since_flush: AtomicUsize,
    /// Orders flushes so snapshots reach disk in sequence
    flush_lock: tokio::sync::Mutex<()>,
}

impl ProgressTracker {
    /// Create a tracker persisting to `path`.
    ///
    /// `worker_count` and `throttle_rate` are recorded in fresh state only;
    /// resumed state keeps the values it was written with.
    pub fn new(
        path: impl Into<PathBuf>,
        flush_every: usize,
        worker_count: usize,
        throttle_rate: u32,
    ) -> Self {
        Self {
            path: path.into(),
            flush_every: flush_every.max(1),
            worker_count,
            throttle_rate,
            state: Mutex::new(ProgressState::new(0, worker_count, throttle_rate)),
            since_flush: AtomicUsize::new(0),
            flush_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ProgressState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Progress file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the persisted state at `path` without installing it.
    ///
    /// Returns `Ok(None)` when no file exists.
    pub async fn read_persisted(path: &Path) -> EnrichResult<Option<ProgressState>> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(EnrichError::ProgressUnavailable {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        };

        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| EnrichError::ProgressUnavailable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    /// Load progress for a run of `run_total` keys.
    ///
    /// Persisted state is honored only when its total matches; anything else
    /// (absent, unreadable, mismatched) yields fresh state. Never fails.
    pub async fn load(&self, run_total: usize) -> ProgressState {
        let fresh = || ProgressState::new(run_total, self.worker_count, self.throttle_rate);

        let state = match Self::read_persisted(&self.path).await {
            Ok(Some(state)) if state.total_records == run_total => {
                info!(
                    run_id = %state.run_id,
                    processed = state.processed_records(),
                    total = run_total,
                    "Resuming run"
                );
                state
            }
            Ok(Some(state)) => {
                warn!(
                    persisted = state.total_records,
                    current = run_total,
                    "Progress total does not match input; starting fresh"
                );
                fresh()
            }
            Ok(None) => {
                debug!("No progress file found, starting fresh");
                fresh()
            }
            Err(e) => {
                warn!("{}; starting fresh", e);
                fresh()
            }
        };

        *self.lock() = state.clone();
        self.since_flush.store(0, Ordering::Release);
        state
    }

    /// Fail unless the progress directory accepts writes
    pub async fn ensure_writable(&self) -> EnrichResult<()> {
        fsutil::ensure_writable(&self.path)
            .await
            .map_err(|e| EnrichError::ProgressPersist {
                path: self.path.clone(),
                reason: e.to_string(),
            })
    }

    /// Mark `key` processed. Idempotent; returns whether it was new.
    pub fn mark_processed(&self, key: &CacheKey) -> bool {
        let added = self.lock().mark(key);
        if added {
            self.since_flush.fetch_add(1, Ordering::AcqRel);
        }
        added
    }

    /// Mark `key` processed and flush behind `cache` when a batch of
    /// markings accumulated.
    ///
    /// Periodic flush failures are logged; the markings stay counted so the
    /// next flush retries them.
    pub async fn record(&self, key: &CacheKey, cache: &CacheStore) {
        if self.mark_processed(key) {
            self.flush_if_due(cache).await;
        }
    }

    /// Like [`record`](Self::record), keeping `reason` for resumed runs
    pub async fn record_failure(&self, key: &CacheKey, reason: &str, cache: &CacheStore) {
        let added = self.lock().mark_failed(key, reason);
        if added {
            self.since_flush.fetch_add(1, Ordering::AcqRel);
            self.flush_if_due(cache).await;
        }
    }

    async fn flush_if_due(&self, cache: &CacheStore) {
        if self.since_flush.load(Ordering::Acquire) >= self.flush_every {
            if let Err(e) = self.flush_after(cache).await {
                warn!("Periodic progress flush failed: {}", e);
            }
        }
    }

    /// Drop processed keys that are not part of the current run
    pub fn retain_keys(&self, keys: &HashSet<CacheKey>) -> usize {
        let dropped = self.lock().retain(keys);
        if dropped > 0 {
            debug!(dropped, "Dropped processed keys outside this run");
            self.since_flush.fetch_add(dropped, Ordering::AcqRel);
        }
        dropped
    }

    /// Clone of the current state
    pub fn snapshot(&self) -> ProgressState {
        self.lock().clone()
    }

    /// Number of processed keys
    pub fn processed_count(&self) -> usize {
        self.lock().processed_records()
    }

    /// `(processed, total)` without cloning the key set
    pub fn counts(&self) -> (usize, usize) {
        let state = self.lock();
        (state.processed_records(), state.total_records)
    }

    /// Persist the current state atomically.
    ///
    /// Only safe on its own once nothing can put into the cache anymore;
    /// while workers run use [`flush_after`](Self::flush_after).
    pub async fn flush(&self) -> EnrichResult<()> {
        let _guard = self.flush_lock.lock().await;

        let marked = self.since_flush.swap(0, Ordering::AcqRel);
        let snapshot = self.snapshot();
        self.write(snapshot, marked).await
    }

    /// Flush `cache`, then persist progress as it was before the cache flush.
    ///
    /// The snapshot is taken first: every key in it had its result put into
    /// the cache before being marked, so the cache flush covers all of them.
    /// Progress is not written when the cache flush fails.
    pub async fn flush_after(&self, cache: &CacheStore) -> EnrichResult<()> {
        let _guard = self.flush_lock.lock().await;

        let marked = self.since_flush.swap(0, Ordering::AcqRel);
        let snapshot = self.snapshot();

        if let Err(e) = cache.flush().await {
            self.since_flush.fetch_add(marked, Ordering::AcqRel);
            return Err(e);
        }

        self.write(snapshot, marked).await
    }

    async fn write(&self, snapshot: ProgressState, marked: usize) -> EnrichResult<()> {
        let result = match serde_json::to_vec_pretty(&snapshot) {
            Ok(content) => fsutil::atomic_write(&self.path, &content)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        if let Err(reason) = result {
            self.since_flush.fetch_add(marked, Ordering::AcqRel);
            return Err(EnrichError::ProgressPersist {
                path: self.path.clone(),
                reason,
            });
        }

        debug!(
            processed = snapshot.processed_records(),
            total = snapshot.total_records,
            "Flushed progress"
        );
        Ok(())
    }

    /// Delete the persisted progress file and reset in-memory state
    pub async fn reset(&self) -> EnrichResult<()> {
        let _guard = self.flush_lock.lock().await;

        match fs::remove_file(&self.path).await {
            Ok(()) => info!("Removed progress file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(EnrichError::io(
                    format!("removing progress file {}", self.path.display()),
                    e,
                ))
            }
        }

        *self.lock() = ProgressState::new(0, self.worker_count, self.throttle_rate);
        self.since_flush.store(0, Ordering::Release);
        Ok(())
    }
}
