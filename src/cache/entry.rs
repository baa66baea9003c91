//! Registry result and cached entry types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Registry metadata for a single network range
///
/// Every field is optional: registries differ in what they expose, and a
/// soft-failed record carries an all-empty value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryInfo {
    /// Registry that answered (arin, ripe, ...)
    pub registry: Option<String>,
    pub handle: Option<String>,
    pub cidr: Option<String>,
    pub start_address: Option<String>,
    pub end_address: Option<String>,
    pub ip_version: Option<String>,
    /// RDAP object class or network type
    pub object_type: Option<String>,
    pub parent_handle: Option<String>,
    /// Opaque event timestamps, stored exactly as the registry sent them
    pub registration_date: Option<String>,
    pub last_changed_date: Option<String>,
    pub asn: Option<String>,
    pub as_name: Option<String>,
    pub reverse_dns: Option<String>,
    pub country_code: Option<String>,
    pub country_name: Option<String>,
    pub isp: Option<String>,
    pub organization: Option<String>,
    pub abuse_email: Option<String>,
    pub tech_email: Option<String>,
}

impl RegistryInfo {
    /// Whether no field carries a value
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Registry metadata plus the time it was cached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    #[serde(flatten)]
    pub info: RegistryInfo,

    /// When this entry was written
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Create an entry stamped with the current time
    pub fn new(info: RegistryInfo) -> Self {
        Self {
            info,
            cached_at: Utc::now(),
        }
    }

    /// Fresh iff `now - cached_at < ttl`
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.cached_at < ttl
    }

    /// Check freshness against the current time
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.is_fresh_at(Utc::now(), ttl)
    }
}
