//! Cache key normalization for network ranges
//!
//! Keys are literal: a bare address and the same address written as a /32
//! (or /128) are different keys, and no range containment is inferred.

use crate::error::{EnrichError, EnrichResult};
use ip_network::IpNetwork;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// IP protocol version of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl fmt::Display for IpVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::V4 => write!(f, "v4"),
            Self::V6 => write!(f, "v6"),
        }
    }
}

/// Normalized network-range key
///
/// Serializes as the plain canonical string, which is also the key used in
/// the persisted cache and progress files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Canonical string form
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the key is a CIDR block rather than a bare address
    pub fn is_network(&self) -> bool {
        self.0.contains('/')
    }

    /// IP version of the key
    pub fn ip_version(&self) -> IpVersion {
        // Canonical IPv6 text always contains a colon, IPv4 never does
        if self.0.contains(':') {
            IpVersion::V6
        } else {
            IpVersion::V4
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize a raw range string into a `CacheKey`.
///
/// Accepts a bare IPv4/IPv6 address or a CIDR block. IPv6 is rendered in
/// compressed lower-case form; a CIDR with host bits set is truncated to
/// its network address.
pub fn normalize(raw: &str) -> EnrichResult<CacheKey> {
    let s = raw.trim().to_ascii_lowercase();

    if s.is_empty() {
        return Err(EnrichError::malformed(raw, "empty range"));
    }

    match s.split_once('/') {
        Some((addr, prefix)) => {
            let addr: IpAddr = addr
                .parse()
                .map_err(|_| EnrichError::malformed(raw, "invalid network address"))?;

            if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
                return Err(EnrichError::malformed(raw, "invalid prefix length"));
            }
            let prefix: u8 = prefix
                .parse()
                .map_err(|_| EnrichError::malformed(raw, "invalid prefix length"))?;

            let network = IpNetwork::new_truncate(addr, prefix)
                .map_err(|e| EnrichError::malformed(raw, e.to_string()))?;

            Ok(CacheKey(network.to_string()))
        }
        None => {
            let addr: IpAddr = s
                .parse()
                .map_err(|_| EnrichError::malformed(raw, "invalid IP address"))?;
            Ok(CacheKey(addr.to_string()))
        }
    }
}
