//! Query Processor: subject-scoped semantic lookup.
//!
//! A query runs three dependent stages in order: resolve the subject to its
//! allowed foundations, embed the query text, then search the store with the
//! foundation filter applied before ranking. Nothing is cached between calls.
use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::category::CategoryMap;
use crate::config::SearchConfig;
use crate::db::Store;
use crate::db::models::{IndexStatus, ScoredResource};
use crate::db::search::SearchFilter;
use crate::embedder::Embedder;
use crate::error::EngineError;
use crate::records::normalize_url;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Query {
    pub subject: String,
    pub topic: String,
    /// Refinement appended to the topic when present.
    #[serde(default)]
    pub subtopic: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Query {
    pub fn new(subject: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_subtopic(mut self, subtopic: impl Into<String>) -> Self {
        self.subtopic = Some(subtopic.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// `"{topic} {subtopic}"` when a non-blank subtopic is given, else the topic.
    #[must_use]
    pub fn effective_text(&self) -> String {
        let topic = self.topic.trim();
        match self.subtopic.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => format!("{topic} {sub}"),
            _ => topic.to_string(),
        }
    }
}

/// Result-size and similarity policy applied to every query.
#[derive(Debug, Clone, Copy)]
pub struct SearchPolicy {
    pub default_limit: usize,
    pub max_limit: usize,
    pub min_score: Option<f64>,
}

impl SearchPolicy {
    #[must_use]
    pub fn from_config(cfg: &SearchConfig) -> Self {
        Self {
            default_limit: cfg.default_limit,
            max_limit: cfg.max_limit,
            min_score: cfg.min_score,
        }
    }

    /// Resolve a requested limit: absent means default, zero is rejected,
    /// anything above the cap is clamped.
    pub fn effective_limit(&self, requested: Option<usize>) -> Result<usize, EngineError> {
        match requested {
            None => Ok(self.default_limit.min(self.max_limit)),
            Some(0) => Err(EngineError::InvalidInput(
                "limit must be a positive integer".to_string(),
            )),
            Some(n) => Ok(n.min(self.max_limit)),
        }
    }
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self::from_config(&SearchConfig::default())
    }
}

#[derive(Clone)]
pub struct ResourceFinder {
    categories: Arc<CategoryMap>,
    embedder: Arc<dyn Embedder>,
    store: Store,
    policy: SearchPolicy,
}

impl ResourceFinder {
    pub fn new(
        categories: Arc<CategoryMap>,
        embedder: Arc<dyn Embedder>,
        store: Store,
        policy: SearchPolicy,
    ) -> Self {
        Self {
            categories,
            embedder,
            store,
            policy,
        }
    }

    /// Find the resources closest to the query within the subject's foundations.
    ///
    /// An empty result is not an error. Results are ordered by descending score,
    /// hold at most one entry per resource URL and never exceed the limit.
    pub async fn find(&self, query: &Query) -> Result<Vec<ScoredResource>, EngineError> {
        if query.topic.trim().is_empty() {
            return Err(EngineError::InvalidInput("topic must not be empty".to_string()));
        }
        let limit = self.policy.effective_limit(query.limit)?;
        let allowed = self.categories.resolve(&query.subject)?;

        let expected = self.embedder.version();
        match self.store.generation()? {
            None => {
                debug!("Index has not been built; returning no results");
                return Ok(Vec::new());
            }
            Some(generation) if generation.version != expected => {
                return Err(EngineError::IndexVersionMismatch {
                    expected: expected.to_string(),
                    found: generation.version.to_string(),
                });
            }
            Some(_) => {}
        }

        let text = query.effective_text();
        let vector = self.embedder.embed(&text).await?;

        let filter = SearchFilter {
            foundations: Some(allowed),
        };
        let hits = self.store.search(&vector, &filter, limit)?;

        let mut seen = HashSet::new();
        let results: Vec<ScoredResource> = hits
            .into_iter()
            .filter(|hit| self.policy.min_score.is_none_or(|min| hit.score >= min))
            .filter(|hit| seen.insert(normalize_url(&hit.record.resource_url)))
            .take(limit)
            .collect();

        debug!(
            "Query '{}' in {}: {} results",
            text,
            query.subject.trim(),
            results.len()
        );
        Ok(results)
    }

    pub fn subjects(&self) -> Vec<String> {
        self.categories.subjects().map(str::to_string).collect()
    }

    pub fn status(&self) -> Result<IndexStatus, EngineError> {
        self.store.status()
    }
}
