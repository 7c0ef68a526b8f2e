/// Embedder trait and shared types for text embedding.
///
/// The same embedder (same model id and dimensionality) must be used for
/// index-time descriptive text and query-time text. The pair is exposed as
/// an [`EmbeddingVersion`] and persisted alongside the index so a mismatch
/// is detected instead of silently degrading relevance.
pub mod hashing;
pub mod openai;
pub mod retry;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::{EmbeddingConfig, EmbeddingProvider};
use hashing::HashingEmbedder;
use openai::OpenAiEmbedder;
use retry::{ResilientEmbedder, RetryPolicy};

/// Errors that can occur during embedding operations.
#[derive(Error, Debug)]
pub enum EmbedderError {
    /// Text was empty or rejected by the service. Not retryable.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transient service failure (network, 429, 5xx). Retryable.
    #[error("embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response from embedding service: {0}")]
    InvalidResponse(String),

    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedder misconfigured: {0}")]
    Configuration(String),
}

impl EmbedderError {
    /// Whether a retry has a chance of succeeding.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable(_) | Self::Timeout(_))
    }
}

/// Identifies one embedding function: model plus output dimensionality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingVersion {
    pub model: String,
    pub dimensions: usize,
}

impl fmt::Display for EmbeddingVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.model, self.dimensions)
    }
}

/// Trait for text embedding implementations.
///
/// All implementations must be `Send + Sync` to allow concurrent use
/// behind `Arc`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text string into a vector of [`Embedder::dimensions`] floats.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError>;

    /// Return the dimensionality of the embedding vectors.
    fn dimensions(&self) -> usize;

    /// Stable identifier of the underlying model.
    fn model_id(&self) -> &str;

    fn version(&self) -> EmbeddingVersion {
        EmbeddingVersion {
            model: self.model_id().to_string(),
            dimensions: self.dimensions(),
        }
    }
}

/// Trim `text` and reject it when nothing is left.
pub fn validate_input(text: &str) -> Result<&str, EmbedderError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(EmbedderError::InvalidInput(
            "text is empty after trimming".to_string(),
        ));
    }
    Ok(trimmed)
}

/// Reject vectors whose length differs from the embedder's declared dimensionality.
pub fn check_dimensions(vector: &[f32], expected: usize) -> Result<(), EmbedderError> {
    if vector.len() != expected {
        return Err(EmbedderError::DimensionMismatch {
            expected,
            actual: vector.len(),
        });
    }
    Ok(())
}

/// L2-normalize a vector in place. Zero vectors are left untouched.
pub fn l2_normalize(vec: &mut [f32]) {
    let norm_sq: f32 = vec.iter().map(|v| v * v).sum();
    if norm_sq > 0.0 {
        let inv = 1.0 / norm_sq.sqrt();
        for v in vec.iter_mut() {
            *v *= inv;
        }
    }
}

/// Build the process-wide embedder described by `cfg`, wrapped with timeout,
/// retry and concurrency limits.
pub fn build_embedder(cfg: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let policy = RetryPolicy::from_config(cfg);

    let embedder: Arc<dyn Embedder> = match cfg.provider {
        EmbeddingProvider::Hashing => Arc::new(ResilientEmbedder::new(
            HashingEmbedder::new(cfg.dimensions),
            policy,
            cfg.max_concurrency,
        )),
        EmbeddingProvider::OpenAi => {
            let api_key = std::env::var(&cfg.api_key_env)
                .with_context(|| format!("{} is not set", cfg.api_key_env))?;
            let inner = OpenAiEmbedder::new(cfg, api_key)
                .context("failed to initialize OpenAI embedder")?;
            Arc::new(ResilientEmbedder::new(inner, policy, cfg.max_concurrency))
        }
    };

    tracing::info!("Embedder ready: {}", embedder.version());
    Ok(embedder)
}
