//! Throttled, resumable enrichment pipeline
//!
//! The [`Coordinator`] builds a queue of distinct keys, feeds it to a fixed
//! pool of workers sharing one [`RateLimiter`], and merges the results back
//! into input order.

pub mod cancel;
pub mod coordinator;
pub mod retry;
pub mod throttle;
pub mod worker;

pub use cancel::CancelToken;
pub use coordinator::{Coordinator, RunOptions, RunOutcome, RunSummary};
pub use retry::RetryPolicy;
pub use throttle::RateLimiter;
pub use worker::{WorkItem, WorkerStats};
