//! CLI command implementations

pub mod cache;
pub mod config;
pub mod enrich;
pub mod progress;

pub use cache::execute as cache;
pub use config::execute as config;
pub use enrich::execute as enrich;
pub use progress::execute as progress;
