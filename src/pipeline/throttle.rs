//! Shared outbound rate limiter
//!
//! A lock-free scheduling bucket with a burst of one: every `acquire`
//! reserves the next free slot by advancing an atomic timestamp `1/R`
//! seconds, then sleeps until its slot. Issued lookups are therefore spaced
//! at least `1/R` apart, so no one-second window sees more than R of them,
//! regardless of how many workers share the limiter.

use crate::error::{EnrichError, EnrichResult};
use crate::pipeline::cancel::CancelToken;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Aggregate rate limiter shared by all workers
#[derive(Debug)]
pub struct RateLimiter {
    origin: Instant,
    interval_nanos: u64,
    /// Next free slot, in nanoseconds since `origin`
    next_slot: AtomicU64,
    per_second: u32,
}

impl RateLimiter {
    /// Allow `per_second` acquisitions per second (minimum 1)
    pub fn new(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self {
            origin: Instant::now(),
            interval_nanos: NANOS_PER_SEC.div_ceil(u64::from(per_second)),
            next_slot: AtomicU64::new(0),
            per_second,
        }
    }

    pub fn per_second(&self) -> u32 {
        self.per_second
    }

    /// Claim the next slot; returns how long to wait for it
    fn reserve(&self) -> Duration {
        let mut slot = self.next_slot.load(Ordering::Acquire);
        loop {
            let now = self.origin.elapsed().as_nanos() as u64;
            let start = slot.max(now);
            match self.next_slot.compare_exchange_weak(
                slot,
                start + self.interval_nanos,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Duration::from_nanos(start - now),
                Err(current) => slot = current,
            }
        }
    }

    /// Wait for a slot.
    ///
    /// Never rejects; returns `EnrichError::Cancelled` promptly if `cancel`
    /// fires first. A cancelled reservation is not handed back.
    pub async fn acquire(&self, cancel: &CancelToken) -> EnrichResult<()> {
        if cancel.is_cancelled() {
            return Err(EnrichError::Cancelled);
        }

        let wait = self.reserve();
        if wait.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EnrichError::Cancelled),
            _ = tokio::time::sleep(wait) => Ok(()),
        }
    }
}
