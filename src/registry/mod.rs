//! Registry client abstraction
//!
//! The pipeline's only network-facing dependency. Implementations report
//! retryable conditions (timeouts, 5xx, connection failures) as
//! `EnrichError::TransientLookup` and everything else (not found, malformed
//! responses) as `EnrichError::PermanentLookup`.

mod rdap;

pub use rdap::{default_base_url, parse_ip_network, RdapClient};

use crate::cache::RegistryInfo;
use crate::config::Config;
use crate::error::EnrichResult;
use crate::key::CacheKey;
use async_trait::async_trait;
use std::sync::Arc;

/// Registry lookup interface
///
/// Per-call timeouts are the client's responsibility.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Look up registry metadata for a normalized range
    async fn lookup(&self, key: &CacheKey) -> EnrichResult<RegistryInfo>;

    /// Human-readable client name for logs
    fn client_name(&self) -> &'static str;
}

/// Create the registry client described by the configuration
pub fn create_client(config: &Config) -> EnrichResult<Arc<dyn RegistryClient>> {
    let client = RdapClient::new(&config.registry, &config.enrichment.registries)?;
    Ok(Arc::new(client))
}
