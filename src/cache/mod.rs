//! Persistent lookup cache for registry results
//!
//! Entries are keyed by normalized range and survive across runs.
//!
//! # Entry States
//!
//! | State | Served | Description |
//! |-------|--------|-------------|
//! | Missing | no | Never looked up |
//! | Stale | no | Older than the TTL, overwritten by the next lookup |
//! | Fresh | yes | Younger than the TTL |

pub mod entry;
pub mod store;

pub use entry::{CacheEntry, RegistryInfo};
pub use store::{CacheLookup, CacheStats, CacheStore};
