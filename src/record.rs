//! Scanner records and their enrichment status
//!
//! Input is either a JSON array (of record objects or bare range strings) or
//! plain text with one range per line. Unknown scanner fields pass through
//! untouched.

use crate::cache::RegistryInfo;
use crate::error::{EnrichError, EnrichResult};
use crate::fsutil;
use crate::key::CacheKey;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tokio::fs;

/// Where a record ended up after a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// Not yet handled (or interrupted before its key was processed)
    #[default]
    Pending,
    /// Looked up from a registry in this run
    Enriched,
    /// Served from a fresh cache entry
    Cached,
    /// Key enriched by an earlier run whose cache entry has since expired
    Resumed,
    /// Lookup gave up; enrichment fields are empty
    Failed,
    /// Range could not be normalized
    Malformed,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Enriched => "enriched",
            Self::Cached => "cached",
            Self::Resumed => "resumed",
            Self::Failed => "failed",
            Self::Malformed => "malformed",
        };
        f.write_str(s)
    }
}

/// A scanner record being enriched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRecord {
    /// Raw network range as reported by the scanner
    #[serde(alias = "ip", alias = "cidr", alias = "network")]
    pub range: String,

    /// Scanner that reported the range
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CacheKey>,

    #[serde(default)]
    pub status: RecordStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrichment: Option<RegistryInfo>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Any other scanner fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EnrichmentRecord {
    pub fn new(range: impl Into<String>) -> Self {
        Self {
            range: range.into(),
            source: None,
            key: None,
            status: RecordStatus::Pending,
            enrichment: None,
            error: None,
            extra: Map::new(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Merge registry fields into the record
    pub fn merge(&mut self, info: &RegistryInfo, status: RecordStatus) {
        self.enrichment = Some(info.clone());
        self.status = status;
        self.error = None;
    }

    /// Record a soft failure: empty enrichment plus the reason
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.enrichment = Some(RegistryInfo::default());
        self.status = RecordStatus::Failed;
        self.error = Some(reason.into());
    }

    pub fn mark_malformed(&mut self, reason: impl Into<String>) {
        self.key = None;
        self.status = RecordStatus::Malformed;
        self.error = Some(reason.into());
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum InputRecord {
    Range(String),
    Record(Box<EnrichmentRecord>),
}

impl From<InputRecord> for EnrichmentRecord {
    fn from(input: InputRecord) -> Self {
        match input {
            InputRecord::Range(range) => EnrichmentRecord::new(range),
            InputRecord::Record(record) => *record,
        }
    }
}

/// Parse records from file contents.
///
/// A document starting with `[` is a JSON array; anything else is read line
/// by line, where blank lines and `#` comments are skipped and a line
/// starting with `{` is a JSON record.
pub fn parse_records(content: &str) -> Result<Vec<EnrichmentRecord>, String> {
    let trimmed = content.trim_start();
    if trimmed.starts_with('[') {
        let inputs: Vec<InputRecord> =
            serde_json::from_str(trimmed).map_err(|e| e.to_string())?;
        return Ok(inputs.into_iter().map(EnrichmentRecord::from).collect());
    }

    let mut records = Vec::new();
    for (lineno, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line.starts_with('{') {
            let record: EnrichmentRecord = serde_json::from_str(line)
                .map_err(|e| format!("line {}: {}", lineno + 1, e))?;
            records.push(record);
        } else {
            records.push(EnrichmentRecord::new(line));
        }
    }
    Ok(records)
}

/// Read records from `path`
pub async fn read_records(path: &Path) -> EnrichResult<Vec<EnrichmentRecord>> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| EnrichError::InputInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    parse_records(&content).map_err(|reason| EnrichError::InputInvalid {
        path: path.to_path_buf(),
        reason,
    })
}

/// Write records to `path` as a pretty JSON array, atomically
pub async fn write_records(path: &Path, records: &[EnrichmentRecord]) -> EnrichResult<()> {
    let json = serde_json::to_vec_pretty(records)?;
    fsutil::atomic_write(path, &json)
        .await
        .map_err(|e| EnrichError::io(format!("writing records to {}", path.display()), e))
}
