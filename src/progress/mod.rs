//! Resumable progress for enrichment runs

pub mod state;
pub mod tracker;

pub use state::ProgressState;
pub use tracker::{ProgressTracker, DEFAULT_FLUSH_EVERY};
