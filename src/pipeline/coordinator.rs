//! Enrichment run coordination
//!
//! A run normalizes every record, resumes progress, serves what it can from
//! the cache, and queues the remaining distinct keys for the worker pool.
//! Cancellation stops the feeder and idle workers, lets in-flight lookups
//! finish, and still flushes state: a cancelled run is a normal, partial
//! result.

use crate::cache::{CacheLookup, CacheStore};
use crate::config::schema::EnrichmentConfig;
use crate::error::{EnrichError, EnrichResult};
use crate::key::{normalize, CacheKey};
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::throttle::RateLimiter;
use crate::pipeline::worker::{run_worker, SharedQueue, WorkItem, WorkerContext, WorkerStats};
use crate::progress::{ProgressState, ProgressTracker};
use crate::record::{EnrichmentRecord, RecordStatus};
use crate::registry::RegistryClient;
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

/// Knobs for a single run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of concurrent workers
    pub parallelism: usize,
    /// Aggregate lookups per second
    pub throttle_rate: u32,
    pub retry: RetryPolicy,
}

impl RunOptions {
    pub fn from_config(config: &EnrichmentConfig) -> Self {
        Self {
            parallelism: config.parallelism.max(1),
            throttle_rate: config.throttle_rate.max(1),
            retry: RetryPolicy::from_config(config),
        }
    }
}

/// What happened during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Input records, malformed included
    pub records: usize,
    /// Distinct valid keys
    pub keys: usize,
    /// Keys handed to the worker pool
    pub queued: usize,
    /// Keys served from a fresh cache entry
    pub cache_hits: usize,
    /// Keys already processed by an earlier, interrupted run
    pub resumed: usize,
    /// Registry calls issued, retries included
    pub lookups: usize,
    pub retries: usize,
    /// Keys whose lookup gave up
    pub soft_failures: usize,
    pub malformed: usize,
    /// The run stopped before every key was processed
    pub cancelled: bool,
}

/// Result of a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Records in input order
    pub records: Vec<EnrichmentRecord>,
    pub progress: ProgressState,
    pub summary: RunSummary,
}

/// Composes the cache, tracker, limiter and worker pool into a run
pub struct Coordinator {
    cache: Arc<CacheStore>,
    tracker: Arc<ProgressTracker>,
    client: Arc<dyn RegistryClient>,
    options: RunOptions,
}

impl Coordinator {
    pub fn new(
        cache: Arc<CacheStore>,
        tracker: Arc<ProgressTracker>,
        client: Arc<dyn RegistryClient>,
        options: RunOptions,
    ) -> Self {
        Self {
            cache,
            tracker,
            client,
            options,
        }
    }

    /// Enrich `records`.
    ///
    /// Fails only when the state files cannot be written at all, before any
    /// lookup is issued. Lookup failures and malformed ranges are reported
    /// on the records themselves.
    pub async fn run(
        &self,
        records: Vec<EnrichmentRecord>,
        cancel: &CancelToken,
    ) -> EnrichResult<RunOutcome> {
        self.cache.ensure_writable().await?;
        self.tracker.ensure_writable().await?;

        let mut summary = RunSummary {
            records: records.len(),
            ..RunSummary::default()
        };

        // Normalize and group by key, keeping first-appearance order
        let mut slots: Vec<Option<EnrichmentRecord>> = Vec::with_capacity(records.len());
        let mut order: Vec<CacheKey> = Vec::new();
        let mut groups: HashMap<CacheKey, Vec<usize>> = HashMap::new();

        for (idx, mut record) in records.into_iter().enumerate() {
            record.status = RecordStatus::Pending;
            record.enrichment = None;
            record.error = None;
            match normalize(&record.range) {
                Ok(key) => {
                    record.key = Some(key.clone());
                    groups
                        .entry(key.clone())
                        .or_insert_with(|| {
                            order.push(key);
                            Vec::new()
                        })
                        .push(idx);
                }
                Err(e) => {
                    debug!(range = %record.range, "Skipping malformed range");
                    record.mark_malformed(e.to_string());
                    summary.malformed += 1;
                }
            }
            slots.push(Some(record));
        }
        summary.keys = order.len();

        if summary.malformed > 0 {
            warn!(count = summary.malformed, "Malformed ranges excluded from enrichment");
        }

        let progress = self.tracker.load(order.len()).await;
        let run_keys: HashSet<CacheKey> = order.iter().cloned().collect();
        let dropped = self.tracker.retain_keys(&run_keys);
        if dropped > 0 {
            warn!(dropped, "Discarded resumed keys that are not part of this input");
        }

        // Serve resumed keys and fresh cache hits; queue the rest
        let mut work = Vec::new();
        for key in order {
            let indices = groups.remove(&key).unwrap_or_default();
            let mut items: Vec<(usize, EnrichmentRecord)> = indices
                .into_iter()
                .filter_map(|idx| slots[idx].take().map(|record| (idx, record)))
                .collect();

            let cached = self.cache.get(&key);
            if progress.is_processed(&key) {
                summary.resumed += 1;
                let failure = progress.failure(&key);
                for (_, record) in items.iter_mut() {
                    match (&cached, failure) {
                        (CacheLookup::Fresh(entry), _) => {
                            record.merge(&entry.info, RecordStatus::Cached)
                        }
                        (_, Some(reason)) => record.fail(reason),
                        _ => record.status = RecordStatus::Resumed,
                    }
                }
                restore(&mut slots, items);
            } else if let CacheLookup::Fresh(entry) = cached {
                summary.cache_hits += 1;
                for (_, record) in items.iter_mut() {
                    record.merge(&entry.info, RecordStatus::Cached);
                }
                self.tracker.record(&key, &self.cache).await;
                restore(&mut slots, items);
            } else {
                work.push(WorkItem {
                    key,
                    records: items,
                });
            }
        }
        summary.queued = work.len();

        info!(
            run_id = %progress.run_id,
            keys = summary.keys,
            queued = summary.queued,
            resumed = summary.resumed,
            cache_hits = summary.cache_hits,
            workers = self.options.parallelism,
            rate = self.options.throttle_rate,
            "Starting enrichment run"
        );

        let mut panicked = false;
        if !work.is_empty() {
            let pool = self.run_pool(work, cancel).await;
            panicked = pool.panicked;
            restore(&mut slots, pool.finished);
            for item in pool.leftover {
                restore(&mut slots, item.records);
            }

            let stats = &pool.ctx.stats;
            summary.cache_hits += WorkerStats::get(&stats.cache_hits);
            summary.lookups = WorkerStats::get(&stats.lookups);
            summary.retries = WorkerStats::get(&stats.retries);
            summary.soft_failures = WorkerStats::get(&stats.soft_failures);
        }

        if let Err(e) = self.tracker.flush_after(&self.cache).await {
            warn!("Final state flush failed: {}", e);
        }

        let progress = self.tracker.snapshot();
        summary.cancelled = !progress.completed;

        let records: Option<Vec<EnrichmentRecord>> = slots.into_iter().collect();
        let records = match records {
            Some(records) if !panicked => records,
            _ => {
                return Err(EnrichError::Internal(
                    "a worker panicked; its records were lost (progress was saved)".to_string(),
                ))
            }
        };

        info!(
            run_id = %progress.run_id,
            processed = progress.processed_records(),
            total = progress.total_records,
            lookups = summary.lookups,
            soft_failures = summary.soft_failures,
            completed = progress.completed,
            "Enrichment run finished"
        );

        Ok(RunOutcome {
            records,
            progress,
            summary,
        })
    }

    /// Run the worker pool over `work` until the queue drains or `cancel` fires
    async fn run_pool(&self, work: Vec<WorkItem>, cancel: &CancelToken) -> PoolResult {
        let workers = self.options.parallelism.max(1);
        let (tx, rx) = mpsc::channel(workers * 2);
        let queue: SharedQueue = Arc::new(Mutex::new(rx));

        let ctx = Arc::new(WorkerContext {
            cache: self.cache.clone(),
            tracker: self.tracker.clone(),
            client: self.client.clone(),
            limiter: Arc::new(RateLimiter::new(self.options.throttle_rate)),
            retry: self.options.retry.clone(),
            stats: WorkerStats::default(),
            cancel: cancel.clone(),
        });

        let feeder = tokio::spawn(feed(tx, work, cancel.clone()));
        let handles: Vec<_> = (0..workers)
            .map(|id| tokio::spawn(run_worker(id, ctx.clone(), queue.clone())))
            .collect();

        let mut finished = Vec::new();
        let mut panicked = false;
        for result in join_all(handles).await {
            match result {
                Ok(records) => finished.extend(records),
                Err(e) => {
                    error!("Worker task failed: {}", e);
                    panicked = true;
                }
            }
        }

        // Unblock the feeder if it is still waiting for room, then collect
        // whatever never reached a worker
        let mut rx = queue.lock().await;
        rx.close();
        let mut leftover = match feeder.await {
            Ok(rest) => rest,
            Err(e) => {
                error!("Feeder task failed: {}", e);
                panicked = true;
                Vec::new()
            }
        };
        while let Ok(item) = rx.try_recv() {
            leftover.push(item);
        }
        drop(rx);

        if !leftover.is_empty() {
            debug!(unprocessed = leftover.len(), "Work left in queue after cancellation");
        }

        PoolResult {
            ctx,
            finished,
            leftover,
            panicked,
        }
    }
}

struct PoolResult {
    /// Shared context, kept for its counters
    ctx: Arc<WorkerContext>,
    /// Records handed back by workers
    finished: Vec<(usize, EnrichmentRecord)>,
    /// Items no worker dequeued
    leftover: Vec<WorkItem>,
    panicked: bool,
}

/// Push work into the queue until exhausted or cancelled; returns unsent items
async fn feed(tx: mpsc::Sender<WorkItem>, work: Vec<WorkItem>, cancel: CancelToken) -> Vec<WorkItem> {
    let mut items = work.into_iter();
    while let Some(item) = items.next() {
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            permit = tx.reserve() => permit.ok(),
        };
        match permit {
            Some(permit) => permit.send(item),
            None => {
                let mut rest = vec![item];
                rest.extend(items);
                return rest;
            }
        }
    }
    Vec::new()
}

fn restore(slots: &mut [Option<EnrichmentRecord>], records: Vec<(usize, EnrichmentRecord)>) {
    for (idx, record) in records {
        slots[idx] = Some(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::RegistryInfo;
    use crate::pipeline::testing::{MockClient, Scripted};
    use crate::pipeline::worker::process_item;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    fn options(parallelism: usize) -> RunOptions {
        RunOptions {
            parallelism,
            throttle_rate: 1000,
            retry: RetryPolicy {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
                jitter: false,
            },
        }
    }

    async fn coordinator(dir: &Path, client: Arc<MockClient>, parallelism: usize) -> Coordinator {
        let cache = CacheStore::open(dir.join("cache.json"), chrono::Duration::hours(24), 10).await;
        let tracker = ProgressTracker::new(dir.join("progress.json"), 10, parallelism, 1000);
        Coordinator::new(Arc::new(cache), Arc::new(tracker), client, options(parallelism))
    }

    fn records(ranges: &[&str]) -> Vec<EnrichmentRecord> {
        ranges.iter().map(|r| EnrichmentRecord::new(*r)).collect()
    }

    fn hundred_ranges() -> Vec<String> {
        (0..100).map(|i| format!("10.0.0.{}", i)).collect()
    }

    // ---- end-to-end tests ----

    #[tokio::test]
    async fn duplicate_ranges_share_one_lookup() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new());
        let coord = coordinator(temp.path(), client.clone(), 2).await;

        let outcome = coord
            .run(records(&["10.0.0.1", "10.0.0.1", "2001:db8::1"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary.queued, 2);
        assert_eq!(client.calls(), 2);
        assert_eq!(outcome.progress.processed_records(), 2);
        assert!(outcome.progress.completed);
        assert!(!outcome.summary.cancelled);

        let ranges: Vec<_> = outcome.records.iter().map(|r| r.range.as_str()).collect();
        assert_eq!(ranges, vec!["10.0.0.1", "10.0.0.1", "2001:db8::1"]);
        assert!(outcome
            .records
            .iter()
            .all(|r| r.status == RecordStatus::Enriched));
        assert_eq!(outcome.records[0].enrichment, outcome.records[1].enrichment);
    }

    #[tokio::test]
    async fn formatting_variants_collapse_to_one_key() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new());
        let coord = coordinator(temp.path(), client.clone(), 2).await;

        let outcome = coord
            .run(
                records(&[" 2001:DB8:0:0::1 ", "2001:db8::1", "10.0.0.1", "10.0.0.1/32"]),
                &CancelToken::new(),
            )
            .await
            .unwrap();

        // A bare address and its /32 stay distinct
        assert_eq!(outcome.summary.keys, 3);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test]
    async fn malformed_records_are_flagged_not_fatal() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new());
        let coord = coordinator(temp.path(), client.clone(), 1).await;

        let outcome = coord
            .run(records(&["not-an-ip", "10.0.0.1", "10.0.0.0/33"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary.malformed, 2);
        assert_eq!(outcome.records[0].status, RecordStatus::Malformed);
        assert!(outcome.records[0].error.is_some());
        assert_eq!(outcome.records[1].status, RecordStatus::Enriched);
        assert_eq!(outcome.progress.total_records, 1);
        assert!(outcome.progress.completed);
    }

    #[tokio::test]
    async fn empty_input_completes_immediately() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new());
        let coord = coordinator(temp.path(), client.clone(), 1).await;

        let outcome = coord.run(Vec::new(), &CancelToken::new()).await.unwrap();

        assert!(outcome.progress.completed);
        assert_eq!(client.calls(), 0);
    }

    // ---- failure tests ----

    #[tokio::test]
    async fn permanent_failure_is_isolated() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new().script("192.0.2.1", vec![Scripted::Permanent]));
        let coord = coordinator(temp.path(), client.clone(), 2).await;

        let outcome = coord
            .run(records(&["192.0.2.1", "10.0.0.1"]), &CancelToken::new())
            .await
            .unwrap();

        assert!(outcome.progress.completed);
        assert_eq!(outcome.summary.soft_failures, 1);
        assert_eq!(outcome.records[0].status, RecordStatus::Failed);
        assert_eq!(outcome.records[1].status, RecordStatus::Enriched);
    }

    #[tokio::test]
    async fn transient_failure_retried_to_success() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new().script("10.0.0.1", vec![Scripted::Transient]));
        let coord = coordinator(temp.path(), client.clone(), 1).await;

        let outcome = coord
            .run(records(&["10.0.0.1"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary.retries, 1);
        assert_eq!(outcome.summary.lookups, 2);
        assert_eq!(outcome.records[0].status, RecordStatus::Enriched);
    }

    #[tokio::test]
    async fn unwritable_state_dir_is_fatal() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let client = Arc::new(MockClient::new());
        let coord = coordinator(&blocker, client.clone(), 1).await;

        let err = coord
            .run(records(&["10.0.0.1"]), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EnrichError::CachePersist { .. }));
        assert_eq!(client.calls(), 0);
    }

    // ---- cache and resume tests ----

    #[tokio::test]
    async fn fresh_cache_hits_are_not_queued() {
        let temp = TempDir::new().unwrap();
        let first = Arc::new(MockClient::new());
        coordinator(temp.path(), first, 1)
            .await
            .run(records(&["10.0.0.1"]), &CancelToken::new())
            .await
            .unwrap();

        let second = Arc::new(MockClient::new());
        let outcome = coordinator(temp.path(), second.clone(), 1)
            .await
            .run(records(&["10.0.0.1", "10.0.0.2"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary.cache_hits, 1);
        assert_eq!(outcome.summary.queued, 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(outcome.records[0].status, RecordStatus::Cached);
        assert_eq!(outcome.records[1].status, RecordStatus::Enriched);
        assert!(outcome.progress.completed);
    }

    #[tokio::test]
    async fn stale_entries_are_looked_up_again() {
        let temp = TempDir::new().unwrap();
        let cache = Arc::new(
            CacheStore::open(temp.path().join("cache.json"), chrono::Duration::hours(1), 10).await,
        );
        let key = normalize("10.0.0.1").unwrap();
        cache.insert(
            key.clone(),
            crate::cache::CacheEntry {
                info: RegistryInfo::default(),
                cached_at: chrono::Utc::now() - chrono::Duration::hours(2),
            },
        );
        let client = Arc::new(MockClient::new());
        let tracker = Arc::new(ProgressTracker::new(temp.path().join("progress.json"), 10, 1, 1000));
        let coord = Coordinator::new(cache.clone(), tracker, client.clone(), options(1));

        let outcome = coord
            .run(records(&["10.0.0.1"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(client.calls(), 1);
        assert_eq!(outcome.records[0].status, RecordStatus::Enriched);
        assert!(cache.get(&key).is_hit());
    }

    #[tokio::test]
    async fn cancelled_run_resumes_where_it_stopped() {
        let temp = TempDir::new().unwrap();
        let ranges = hundred_ranges();
        let input: Vec<&str> = ranges.iter().map(String::as_str).collect();

        let token = CancelToken::new();
        let first = Arc::new(MockClient::new().cancel_after(40, token.clone()));
        let outcome = coordinator(temp.path(), first.clone(), 1)
            .await
            .run(records(&input), &token)
            .await
            .unwrap();

        assert!(outcome.summary.cancelled);
        assert!(!outcome.progress.completed);
        assert_eq!(outcome.progress.processed_records(), 40);
        assert_eq!(outcome.records.len(), 100);
        assert_eq!(outcome.records[99].status, RecordStatus::Pending);

        let done: HashSet<CacheKey> = first.seen().into_iter().collect();
        assert_eq!(done.len(), 40);

        let second = Arc::new(MockClient::new());
        let outcome = coordinator(temp.path(), second.clone(), 4)
            .await
            .run(records(&input), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary.resumed, 40);
        assert_eq!(outcome.summary.queued, 60);
        assert_eq!(second.calls(), 60);
        assert!(second.seen().iter().all(|key| !done.contains(key)));
        assert!(outcome.progress.completed);
        assert!(outcome
            .records
            .iter()
            .all(|r| matches!(r.status, RecordStatus::Enriched | RecordStatus::Cached)));
    }

    #[tokio::test]
    async fn crash_between_flushes_keeps_lookup_result() {
        let temp = TempDir::new().unwrap();
        let first = Arc::new(MockClient::new());
        {
            // Cache batches outlast progress batches; no final flush runs
            let cache = Arc::new(
                CacheStore::open(temp.path().join("cache.json"), chrono::Duration::hours(24), 25)
                    .await,
            );
            let tracker = Arc::new(ProgressTracker::new(temp.path().join("progress.json"), 1, 1, 1000));
            tracker.load(2).await;
            let ctx = WorkerContext {
                cache,
                tracker,
                client: first.clone(),
                limiter: Arc::new(RateLimiter::new(1000)),
                retry: options(1).retry,
                stats: WorkerStats::default(),
                cancel: CancelToken::new(),
            };
            let key = normalize("10.0.0.1").unwrap();
            let mut record = EnrichmentRecord::new("10.0.0.1");
            record.key = Some(key.clone());
            process_item(0, &ctx, WorkItem { key, records: vec![(0, record)] }).await;
        }

        let second = Arc::new(MockClient::new());
        let outcome = coordinator(temp.path(), second.clone(), 1)
            .await
            .run(records(&["10.0.0.1", "10.0.0.2"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary.resumed, 1);
        assert_eq!(second.calls(), 1);
        assert_eq!(outcome.records[0].status, RecordStatus::Cached);
        assert_eq!(
            outcome.records[0].enrichment.as_ref().unwrap().handle.as_deref(),
            Some("NET-10.0.0.1")
        );
    }

    #[tokio::test]
    async fn resumed_soft_failure_keeps_its_reason() {
        let temp = TempDir::new().unwrap();
        let failed = normalize("192.0.2.1").unwrap();
        {
            let cache = CacheStore::open(temp.path().join("cache.json"), chrono::Duration::hours(24), 10).await;
            let tracker = ProgressTracker::new(temp.path().join("progress.json"), 10, 1, 1000);
            tracker.load(2).await;
            tracker.record_failure(&failed, "registry returned 404", &cache).await;
            tracker.flush().await.unwrap();
        }

        let client = Arc::new(MockClient::new());
        let outcome = coordinator(temp.path(), client.clone(), 1)
            .await
            .run(records(&["192.0.2.1", "10.0.0.1"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(client.calls(), 1);
        assert_eq!(outcome.summary.resumed, 1);
        assert_eq!(outcome.records[0].status, RecordStatus::Failed);
        assert_eq!(outcome.records[0].error.as_deref(), Some("registry returned 404"));
        assert_eq!(outcome.progress.failure(&failed), Some("registry returned 404"));
        assert_eq!(outcome.records[1].status, RecordStatus::Enriched);
    }

    #[tokio::test]
    async fn mismatched_total_restarts_from_scratch() {
        let temp = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(temp.path().join("progress.json"), 10, 1, 1000);
        tracker.load(5).await;
        tracker.mark_processed(&normalize("10.0.0.1").unwrap());
        tracker.flush().await.unwrap();

        let client = Arc::new(MockClient::new());
        // No cache file: every key must be looked up
        let outcome = coordinator(temp.path(), client.clone(), 2)
            .await
            .run(records(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.summary.resumed, 0);
        assert_eq!(outcome.summary.queued, 3);
        assert_eq!(outcome.progress.total_records, 3);
        assert!(outcome.progress.completed);
    }

    #[tokio::test]
    async fn cancelled_before_start_leaves_everything_pending() {
        let temp = TempDir::new().unwrap();
        let client = Arc::new(MockClient::new());
        let coord = coordinator(temp.path(), client.clone(), 2).await;
        let token = CancelToken::new();
        token.cancel();

        let outcome = coord
            .run(records(&["10.0.0.1", "10.0.0.2"]), &token)
            .await
            .unwrap();

        assert_eq!(client.calls(), 0);
        assert!(outcome.summary.cancelled);
        assert!(outcome
            .records
            .iter()
            .all(|r| r.status == RecordStatus::Pending));
        assert!(temp.path().join("progress.json").exists());
    }
}
