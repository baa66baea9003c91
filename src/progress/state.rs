//! Resumable run progress state

use crate::key::CacheKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use uuid::Uuid;

/// Progress of a single enrichment run
///
/// The unit of progress is the distinct normalized key, so `total_records`
/// counts distinct valid keys in the run input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "ProgressFile", from = "ProgressFile")]
pub struct ProgressState {
    /// Identifies the run in logs
    pub run_id: Uuid,

    /// Fixed for the lifetime of a run
    pub total_records: usize,

    /// Keys fully handled (enriched, served from cache, or soft-failed)
    pub processed_keys: HashSet<CacheKey>,

    /// Soft-failure reason for processed keys whose lookup gave up
    pub failed_keys: HashMap<CacheKey, String>,

    pub started_at: DateTime<Utc>,

    pub last_updated_at: DateTime<Utc>,

    pub worker_count: usize,

    /// Lookups per second
    pub throttle_rate: u32,

    /// True iff every key has been processed
    pub completed: bool,
}

impl ProgressState {
    /// Create empty state for a run of `total_records` keys
    pub fn new(total_records: usize, worker_count: usize, throttle_rate: u32) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            total_records,
            processed_keys: HashSet::new(),
            failed_keys: HashMap::new(),
            started_at: now,
            last_updated_at: now,
            worker_count,
            throttle_rate,
            completed: total_records == 0,
        }
    }

    pub fn processed_records(&self) -> usize {
        self.processed_keys.len()
    }

    pub fn remaining(&self) -> usize {
        self.total_records.saturating_sub(self.processed_keys.len())
    }

    pub fn is_processed(&self, key: &CacheKey) -> bool {
        self.processed_keys.contains(key)
    }

    /// Mark `key` processed; returns whether it was newly added.
    pub(crate) fn mark(&mut self, key: &CacheKey) -> bool {
        let added = if self.processed_keys.contains(key) {
            false
        } else {
            self.processed_keys.insert(key.clone())
        };
        self.last_updated_at = Utc::now();
        self.refresh_completed();
        added
    }

    /// Why the lookup for a processed key gave up, if it did
    pub fn failure(&self, key: &CacheKey) -> Option<&str> {
        self.failed_keys.get(key).map(String::as_str)
    }

    /// Mark `key` processed as a soft failure; returns whether it was newly added.
    pub(crate) fn mark_failed(&mut self, key: &CacheKey, reason: &str) -> bool {
        let added = self.mark(key);
        if added {
            self.failed_keys.insert(key.clone(), reason.to_string());
        }
        added
    }

    /// Drop processed keys outside `keys`; returns how many were dropped.
    pub(crate) fn retain(&mut self, keys: &HashSet<CacheKey>) -> usize {
        let before = self.processed_keys.len();
        self.processed_keys.retain(|k| keys.contains(k));
        self.failed_keys.retain(|k, _| keys.contains(k));
        let dropped = before - self.processed_keys.len();
        if dropped > 0 {
            self.last_updated_at = Utc::now();
            self.refresh_completed();
        }
        dropped
    }

    fn refresh_completed(&mut self) {
        self.completed = self.processed_keys.len() == self.total_records;
    }
}

/// On-disk progress format
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressFile {
    run_id: Uuid,
    total_records: usize,
    processed_records: usize,
    /// Sorted for stable diffs
    processed_keys: Vec<CacheKey>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    failed_keys: BTreeMap<CacheKey, String>,
    started_at: DateTime<Utc>,
    last_updated_at: DateTime<Utc>,
    worker_count: usize,
    throttle_rate: u32,
    completed: bool,
}

impl From<ProgressState> for ProgressFile {
    fn from(state: ProgressState) -> Self {
        let mut processed_keys: Vec<CacheKey> = state.processed_keys.into_iter().collect();
        processed_keys.sort();
        Self {
            run_id: state.run_id,
            total_records: state.total_records,
            processed_records: processed_keys.len(),
            processed_keys,
            failed_keys: state.failed_keys.into_iter().collect(),
            started_at: state.started_at,
            last_updated_at: state.last_updated_at,
            worker_count: state.worker_count,
            throttle_rate: state.throttle_rate,
            completed: state.completed,
        }
    }
}

impl From<ProgressFile> for ProgressState {
    fn from(file: ProgressFile) -> Self {
        let processed_keys: HashSet<CacheKey> = file.processed_keys.into_iter().collect();
        // Derive completion from the key set; the stored flag may predate a crash
        let completed = processed_keys.len() == file.total_records;
        let failed_keys = file
            .failed_keys
            .into_iter()
            .filter(|(k, _)| processed_keys.contains(k))
            .collect();
        Self {
            run_id: file.run_id,
            total_records: file.total_records,
            processed_keys,
            failed_keys,
            started_at: file.started_at,
            last_updated_at: file.last_updated_at,
            worker_count: file.worker_count,
            throttle_rate: file.throttle_rate,
            completed,
        }
    }
}
