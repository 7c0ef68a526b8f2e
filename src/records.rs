//! Resource records: the fixed input type for indexing.
//!
//! Records come from an upstream extraction stage as JSON arrays, one file
//! per foundation unit. They are validated once here, at the indexing
//! boundary, and are immutable afterwards.
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::EngineError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceType {
    Video,
    Article,
    #[default]
    Other,
}

impl ResourceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Video => "Video",
            Self::Article => "Article",
            Self::Other => "Other",
        }
    }
}

impl From<String> for ResourceType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "video" => Self::Video,
            "article" => Self::Article,
            _ => Self::Other,
        }
    }
}

impl From<ResourceType> for String {
    fn from(t: ResourceType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRecord {
    #[serde(default)]
    pub subtopic_name: String,
    pub resource_name: String,
    pub resource_url: String,
    #[serde(default)]
    pub resource_type: ResourceType,
    pub foundation_name: String,
    #[serde(default)]
    pub foundation_url: String,
    /// Free-form duration, e.g. `"4.6 minutes"`.
    #[serde(default)]
    pub estimated_time: String,
}

impl ResourceRecord {
    /// Reject records that cannot be indexed meaningfully.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.foundation_name.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "foundation_name is empty".to_string(),
            ));
        }
        if self.resource_name.trim().is_empty() {
            return Err(EngineError::InvalidInput("resource_name is empty".to_string()));
        }
        if self.resource_url.trim().is_empty() {
            return Err(EngineError::InvalidInput("resource_url is empty".to_string()));
        }
        Ok(())
    }

    /// Copy with the foundation name trimmed, the form it is matched against
    /// the category map and stored in.
    #[must_use]
    pub fn normalized(&self) -> Self {
        Self {
            foundation_name: self.foundation_name.trim().to_string(),
            ..self.clone()
        }
    }

    /// Canonical embedding input: `"{foundation}: {subtopic} - {resource}"`.
    #[must_use]
    pub fn descriptive_text(&self) -> String {
        format!(
            "{}: {} - {}",
            self.foundation_name, self.subtopic_name, self.resource_name
        )
    }

    /// Stable index entry id derived from the resource URL and name.
    #[must_use]
    pub fn entry_id(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.resource_url.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.resource_name.as_bytes());
        hasher.finalize().to_hex()[..32].to_string()
    }

    /// Hash of everything stored for this record. Equal fingerprints mean a
    /// rebuild can keep the existing entry as is.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        text_hash(&[
            self.descriptive_text().as_str(),
            &self.resource_url,
            self.resource_type.as_str(),
            &self.foundation_url,
            &self.estimated_time,
        ]
        .join("\u{1f}"))
    }

    /// Human-readable handle used in build reports.
    #[must_use]
    pub fn record_ref(&self) -> String {
        format!("{} <{}>", self.resource_name, self.resource_url)
    }

    /// Parse `estimated_time` into minutes.
    ///
    /// Understands unit phrases (`"4.6 minutes"`, `"1 hour 5 min"`,
    /// `"45 seconds"`) and clock forms (`"4:35"`, `"1:02:10"`).
    #[must_use]
    pub fn estimated_minutes(&self) -> Option<f64> {
        parse_minutes(&self.estimated_time)
    }
}

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(\d+):(\d{2})(?::(\d{2}))?\s*$").expect("valid clock regex")
});

static UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(hours?|hrs?|h|minutes?|mins?|m|seconds?|secs?|s)\b")
        .expect("valid duration regex")
});

fn parse_minutes(raw: &str) -> Option<f64> {
    if let Some(caps) = CLOCK_RE.captures(raw) {
        let a: f64 = caps[1].parse().ok()?;
        let b: f64 = caps[2].parse().ok()?;
        return Some(match caps.get(3) {
            Some(c) => a * 60.0 + b + c.as_str().parse::<f64>().ok()? / 60.0,
            None => a + b / 60.0,
        });
    }

    let mut total = 0.0;
    let mut matched = false;
    for caps in UNIT_RE.captures_iter(raw) {
        let value: f64 = caps[1].parse().ok()?;
        let unit = caps[2].to_ascii_lowercase();
        total += match unit.chars().next() {
            Some('h') => value * 60.0,
            Some('s') => value / 60.0,
            _ => value,
        };
        matched = true;
    }
    matched.then_some(total)
}

/// Canonical form of a resource URL for identity comparisons.
#[must_use]
pub fn normalize_url(url: &str) -> String {
    url.trim().to_lowercase()
}

/// Fingerprint of a descriptive text, used to skip unchanged records on rebuild.
#[must_use]
pub fn text_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Load every `*.json` file in `dir` (sorted by name). Each file holds a JSON
/// array of records; files that fail to parse are logged and skipped.
pub fn load_records_dir<P: AsRef<Path>>(dir: P) -> Result<Vec<ResourceRecord>> {
    let dir = dir.as_ref();
    let pattern = dir.join("*.json");
    let pattern = pattern.to_string_lossy();

    let mut files: Vec<_> = glob::glob(&pattern)
        .context("invalid records directory pattern")?
        .flatten()
        .filter(|p| p.is_file())
        .collect();
    files.sort();

    anyhow::ensure!(!files.is_empty(), "no JSON files found in {}", dir.display());
    info!("Found {} record files in {}", files.len(), dir.display());

    let mut records = Vec::new();
    for file in files {
        let data = match std::fs::read_to_string(&file) {
            Ok(d) => d,
            Err(e) => {
                warn!("Failed to read {}: {e}", file.display());
                continue;
            }
        };
        match serde_json::from_str::<Vec<ResourceRecord>>(&data) {
            Ok(batch) => {
                info!("Loaded {} records from {}", batch.len(), file.display());
                records.extend(batch);
            }
            Err(e) => warn!("Skipping {}: expected an array of records ({e})", file.display()),
        }
    }

    info!("Total records loaded: {}", records.len());
    Ok(records)
}

#[cfg(test)]
pub(crate) fn sample_record(foundation: &str, subtopic: &str, name: &str) -> ResourceRecord {
    ResourceRecord {
        subtopic_name: subtopic.to_string(),
        resource_name: name.to_string(),
        resource_url: format!(
            "https://www.khanacademy.org/test/{}",
            name.to_lowercase().replace(' ', "-")
        ),
        resource_type: ResourceType::Video,
        foundation_name: foundation.to_string(),
        foundation_url: String::new(),
        estimated_time: "4.6 minutes".to_string(),
    }
}
