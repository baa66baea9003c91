//! RDAP registry client
//!
//! Queries `<base>/ip/<key>` against each configured registry in order.
//! `ureq` is blocking, so every lookup runs on Tokio's blocking pool.

use super::RegistryClient;
use crate::cache::RegistryInfo;
use crate::config::schema::RegistryConfig;
use crate::error::{EnrichError, EnrichResult};
use crate::key::CacheKey;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace};
use ureq::Agent;

/// Well-known RDAP base URLs for the regional internet registries
pub fn default_base_url(registry: &str) -> Option<&'static str> {
    match registry {
        "arin" => Some("https://rdap.arin.net/registry"),
        "ripe" => Some("https://rdap.db.ripe.net"),
        "apnic" => Some("https://rdap.apnic.net"),
        "lacnic" => Some("https://rdap.lacnic.net/rdap"),
        "afrinic" => Some("https://rdap.afrinic.net/rdap"),
        _ => None,
    }
}

/// RDAP-over-HTTPS registry client
#[derive(Clone)]
pub struct RdapClient {
    agent: Agent,
    /// (registry name, base URL) in query order
    registries: Vec<(String, String)>,
    user_agent: String,
}

impl RdapClient {
    /// Build a client for the ordered `registries`
    pub fn new(config: &RegistryConfig, registries: &[String]) -> EnrichResult<Self> {
        let registries = registries
            .iter()
            .map(|name| {
                let base = config
                    .base_urls
                    .get(name)
                    .map(String::as_str)
                    .or_else(|| default_base_url(name))
                    .ok_or_else(|| {
                        EnrichError::Internal(format!("no RDAP base URL for registry '{}'", name))
                    })?;
                Ok((name.clone(), base.trim_end_matches('/').to_string()))
            })
            .collect::<EnrichResult<Vec<_>>>()?;

        let agent: Agent = Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs)))
            .http_status_as_error(false)
            .build()
            .into();

        Ok(Self {
            agent,
            registries,
            user_agent: config.user_agent.clone(),
        })
    }

    fn lookup_blocking(&self, key: &CacheKey) -> EnrichResult<RegistryInfo> {
        for (name, base) in &self.registries {
            let url = format!("{}/ip/{}", base, key);
            trace!(registry = %name, url = %url, "RDAP query");

            match self.query(&url)? {
                Some(body) => return parse_ip_network(name, &body),
                None => debug!(registry = %name, key = %key, "Not found, trying next registry"),
            }
        }

        Err(EnrichError::PermanentLookup(format!(
            "{} not found in any configured registry",
            key
        )))
    }

    /// Fetch one RDAP document; `Ok(None)` on 404
    fn query(&self, url: &str) -> EnrichResult<Option<Value>> {
        let mut response = match self
            .agent
            .get(url)
            .header("Accept", "application/rdap+json")
            .header("User-Agent", &self.user_agent)
            .call()
        {
            Ok(response) => response,
            Err(e) => return Err(classify_transport_error(url, e)),
        };

        let status = response.status().as_u16();
        match status {
            200..=299 => response
                .body_mut()
                .read_json::<Value>()
                .map(Some)
                .map_err(|e| EnrichError::PermanentLookup(format!("{}: invalid RDAP body: {}", url, e))),
            404 => Ok(None),
            429 | 500..=599 => Err(EnrichError::TransientLookup(format!(
                "{}: HTTP {}",
                url, status
            ))),
            _ => Err(EnrichError::PermanentLookup(format!(
                "{}: HTTP {}",
                url, status
            ))),
        }
    }
}

fn classify_transport_error(url: &str, error: ureq::Error) -> EnrichError {
    match error {
        ureq::Error::Timeout(_)
        | ureq::Error::Io(_)
        | ureq::Error::HostNotFound
        | ureq::Error::ConnectionFailed => {
            EnrichError::TransientLookup(format!("{}: {}", url, error))
        }
        other => EnrichError::PermanentLookup(format!("{}: {}", url, other)),
    }
}

#[async_trait]
impl RegistryClient for RdapClient {
    async fn lookup(&self, key: &CacheKey) -> EnrichResult<RegistryInfo> {
        let client = self.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || client.lookup_blocking(&key))
            .await
            .map_err(|e| EnrichError::Internal(format!("RDAP lookup task failed: {}", e)))?
    }

    fn client_name(&self) -> &'static str {
        "rdap"
    }
}

/// Extract registry fields from an RDAP `ip network` object.
///
/// `queried` names the registry the request went to; when the response
/// carries a `port43` WHOIS host the answering registry is derived from it,
/// since RIRs redirect queries for space they do not manage.
pub fn parse_ip_network(queried: &str, body: &Value) -> EnrichResult<RegistryInfo> {
    let class = str_field(body, "objectClassName");
    if class.as_deref() != Some("ip network") {
        return Err(EnrichError::PermanentLookup(format!(
            "unexpected RDAP object class {:?}",
            class
        )));
    }

    let registry = str_field(body, "port43")
        .and_then(|host| registry_from_whois_host(&host))
        .unwrap_or_else(|| queried.to_string());

    let mut info = RegistryInfo {
        registry: Some(registry),
        handle: str_field(body, "handle"),
        cidr: cidrs(body),
        start_address: str_field(body, "startAddress"),
        end_address: str_field(body, "endAddress"),
        ip_version: str_field(body, "ipVersion"),
        object_type: str_field(body, "type").or(class),
        parent_handle: str_field(body, "parentHandle"),
        registration_date: event_date(body, "registration"),
        last_changed_date: event_date(body, "last changed"),
        asn: origin_asns(body),
        country_code: str_field(body, "country"),
        isp: str_field(body, "name"),
        ..Default::default()
    };

    if let Some(entities) = body.get("entities").and_then(Value::as_array) {
        collect_entities(entities, &mut info);
    }

    Ok(info)
}

fn str_field(value: &Value, field: &str) -> Option<String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn registry_from_whois_host(host: &str) -> Option<String> {
    let host = host.to_ascii_lowercase();
    ["arin", "ripe", "apnic", "lacnic", "afrinic"]
        .into_iter()
        .find(|rir| host.contains(rir))
        .map(String::from)
}

fn cidrs(body: &Value) -> Option<String> {
    let list = body.get("cidr0_cidrs")?.as_array()?;
    let rendered: Vec<String> = list
        .iter()
        .filter_map(|c| {
            let prefix = c
                .get("v4prefix")
                .or_else(|| c.get("v6prefix"))
                .and_then(Value::as_str)?;
            let length = c.get("length").and_then(Value::as_u64)?;
            Some(format!("{}/{}", prefix, length))
        })
        .collect();
    (!rendered.is_empty()).then(|| rendered.join(", "))
}

fn event_date(body: &Value, action: &str) -> Option<String> {
    body.get("events")?
        .as_array()?
        .iter()
        .find(|e| e.get("eventAction").and_then(Value::as_str) == Some(action))
        .and_then(|e| str_field(e, "eventDate"))
}

/// ARIN exposes origin ASNs through the `arin_originas0` extension
fn origin_asns(body: &Value) -> Option<String> {
    let list = body.get("arin_originas0_originautnums")?.as_array()?;
    let asns: Vec<String> = list
        .iter()
        .filter_map(Value::as_u64)
        .map(|n| format!("AS{}", n))
        .collect();
    (!asns.is_empty()).then(|| asns.join(", "))
}

fn collect_entities(entities: &[Value], info: &mut RegistryInfo) {
    for entity in entities {
        let roles: Vec<&str> = entity
            .get("roles")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        for role in roles {
            match role {
                "registrant" if info.organization.is_none() => {
                    info.organization = vcard_property(entity, "fn");
                }
                "abuse" if info.abuse_email.is_none() => {
                    info.abuse_email = vcard_property(entity, "email");
                }
                "technical" if info.tech_email.is_none() => {
                    info.tech_email = vcard_property(entity, "email");
                }
                _ => {}
            }
        }

        if let Some(nested) = entity.get("entities").and_then(Value::as_array) {
            collect_entities(nested, info);
        }
    }
}

/// Read a property from a jCard: `["vcard", [[name, params, type, value], ...]]`
fn vcard_property(entity: &Value, name: &str) -> Option<String> {
    entity
        .get("vcardArray")?
        .get(1)?
        .as_array()?
        .iter()
        .find(|p| p.get(0).and_then(Value::as_str) == Some(name))
        .and_then(|p| p.get(3))
        .and_then(Value::as_str)
        .map(String::from)
}
