//! Enrichment workers
//!
//! Each worker drains the shared queue until it is closed and empty or
//! cancellation is signaled. Locks on the cache and tracker are only taken
//! for in-memory updates; nothing is held across the limiter or the network.

use crate::cache::{CacheLookup, CacheStore, RegistryInfo};
use crate::error::{EnrichError, EnrichResult};
use crate::key::CacheKey;
use crate::pipeline::cancel::CancelToken;
use crate::pipeline::retry::RetryPolicy;
use crate::pipeline::throttle::RateLimiter;
use crate::progress::ProgressTracker;
use crate::record::{EnrichmentRecord, RecordStatus};
use crate::registry::RegistryClient;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

/// One distinct key and every record (with its input position) that carries it
#[derive(Debug)]
pub struct WorkItem {
    pub key: CacheKey,
    pub records: Vec<(usize, EnrichmentRecord)>,
}

/// Receiving half of the work queue, shared by all workers
pub type SharedQueue = Arc<Mutex<mpsc::Receiver<WorkItem>>>;

/// Per-run counters updated by workers
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub lookups: AtomicUsize,
    pub cache_hits: AtomicUsize,
    pub retries: AtomicUsize,
    pub soft_failures: AtomicUsize,
}

impl WorkerStats {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::Relaxed)
    }
}

/// Everything a worker shares with its siblings
pub struct WorkerContext {
    pub cache: Arc<CacheStore>,
    pub tracker: Arc<ProgressTracker>,
    pub client: Arc<dyn RegistryClient>,
    pub limiter: Arc<RateLimiter>,
    pub retry: RetryPolicy,
    pub stats: WorkerStats,
    pub cancel: CancelToken,
}

/// Drain the queue; returns the records of every item this worker dequeued
pub async fn run_worker(
    id: usize,
    ctx: Arc<WorkerContext>,
    queue: SharedQueue,
) -> Vec<(usize, EnrichmentRecord)> {
    let mut done = Vec::new();
    let mut items = 0usize;

    loop {
        if ctx.cancel.is_cancelled() {
            debug!(worker = id, "Cancellation observed, stopping");
            break;
        }

        let item = {
            let mut rx = queue.lock().await;
            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                item = rx.recv() => item,
            }
        };
        let Some(item) = item else {
            break;
        };

        items += 1;
        done.extend(process_item(id, &ctx, item).await);
    }

    debug!(worker = id, items, "Worker finished");
    done
}

/// Enrich one work item
///
/// The key is marked processed once its records are merged, whether from
/// cache, a successful lookup, or a soft failure. A successful result is put
/// into the cache before the key is marked. Cancellation before a
/// result returns the records unchanged and leaves the key unmarked.
pub async fn process_item(
    id: usize,
    ctx: &WorkerContext,
    item: WorkItem,
) -> Vec<(usize, EnrichmentRecord)> {
    let WorkItem { key, mut records } = item;

    if let CacheLookup::Fresh(entry) = ctx.cache.get(&key) {
        WorkerStats::bump(&ctx.stats.cache_hits);
        debug!(worker = id, key = %key, "Cache hit");
        merge_all(&mut records, &entry.info, RecordStatus::Cached);
        ctx.tracker.record(&key, &ctx.cache).await;
        return records;
    }

    match lookup_with_retry(id, ctx, &key).await {
        Ok(info) => {
            ctx.cache.put(key.clone(), info.clone());
            ctx.cache.flush_if_due().await;
            merge_all(&mut records, &info, RecordStatus::Enriched);
            ctx.tracker.record(&key, &ctx.cache).await;
        }
        Err(EnrichError::Cancelled) => {
            debug!(worker = id, key = %key, "Lookup abandoned on cancellation");
            return records;
        }
        Err(e) => {
            WorkerStats::bump(&ctx.stats.soft_failures);
            warn!(worker = id, key = %key, error = %e, "Lookup failed, leaving fields empty");
            let reason = e.to_string();
            for (_, record) in records.iter_mut() {
                record.fail(reason.clone());
            }
            ctx.tracker.record_failure(&key, &reason, &ctx.cache).await;
        }
    }

    records
}

async fn lookup_with_retry(
    id: usize,
    ctx: &WorkerContext,
    key: &CacheKey,
) -> EnrichResult<RegistryInfo> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        ctx.limiter.acquire(&ctx.cancel).await?;
        WorkerStats::bump(&ctx.stats.lookups);

        match ctx.client.lookup(key).await {
            Ok(info) => return Ok(info),
            Err(e) if e.is_retryable() && ctx.retry.should_retry(attempt) => {
                let delay = ctx.retry.backoff(attempt);
                WorkerStats::bump(&ctx.stats.retries);
                debug!(
                    worker = id,
                    key = %key,
                    attempt,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient lookup failure, backing off"
                );
                tokio::select! {
                    biased;
                    _ = ctx.cancel.cancelled() => return Err(EnrichError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
}

fn merge_all(records: &mut [(usize, EnrichmentRecord)], info: &RegistryInfo, status: RecordStatus) {
    for (_, record) in records.iter_mut() {
        record.merge(info, status);
    }
}
