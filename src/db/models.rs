use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::embedder::EmbeddingVersion;
use crate::records::ResourceRecord;

/// A search hit: the stored record plus its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResource {
    pub entry_id: String,
    #[serde(flatten)]
    pub record: ResourceRecord,
    /// Cosine similarity mapped to `[0, 1]`; higher is more similar.
    pub score: f64,
}

/// Fingerprint of a stored entry, compared on rebuild to skip re-embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryFingerprint {
    pub text_hash: String,
    pub embedding_model: String,
}

/// Embedding function the current index generation was built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexGeneration {
    pub version: EmbeddingVersion,
    pub built_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStatus {
    pub entries: usize,
    pub embedding_model: Option<String>,
    pub dimensions: Option<usize>,
    pub built_at: Option<DateTime<Utc>>,
    pub per_foundation: BTreeMap<String, usize>,
    pub sample_resource: Option<String>,
}
