//! netenrich - Registry enrichment for scanner network ranges
//!
//! Looks up registry ownership, ASN and contact data for IP addresses and
//! CIDR blocks through a throttled worker pool, caching results across runs
//! and resuming interrupted runs where they stopped.

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
mod fsutil;
pub mod key;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod registry;
pub mod ui;

pub use error::{EnrichError, EnrichResult};
