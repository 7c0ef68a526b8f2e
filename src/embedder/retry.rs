/// Timeout, bounded retry with exponential backoff, and a concurrency cap
/// around any [`Embedder`].
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use super::{Embedder, EmbedderError, check_dimensions, validate_input};
use crate::config::EmbeddingConfig;

const MAX_BACKOFF: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    #[must_use]
    pub fn from_config(cfg: &EmbeddingConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay: Duration::from_millis(cfg.backoff_ms),
            call_timeout: Duration::from_secs(cfg.timeout_secs),
        }
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(200),
            call_timeout: Duration::from_secs(30),
        }
    }
}

pub struct ResilientEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
    permits: Semaphore,
}

impl<E: Embedder> ResilientEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy, max_concurrency: usize) -> Self {
        Self {
            inner,
            policy,
            permits: Semaphore::new(max_concurrency.max(1)),
        }
    }

    async fn attempt(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EmbedderError::ServiceUnavailable("embedder shut down".to_string()))?;

        match tokio::time::timeout(self.policy.call_timeout, self.inner.embed(text)).await {
            Ok(result) => result,
            Err(_) => Err(EmbedderError::Timeout(self.policy.call_timeout)),
        }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for ResilientEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let text = validate_input(text)?;

        let mut attempt = 0;
        loop {
            match self.attempt(text).await {
                Ok(vector) => {
                    check_dimensions(&vector, self.inner.dimensions())?;
                    return Ok(vector);
                }
                Err(e) if e.is_retryable() && attempt < self.policy.max_retries => {
                    let delay = self.policy.delay_for(attempt);
                    attempt += 1;
                    warn!(
                        "Embedding attempt {attempt} failed ({e}), retrying in {}ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if e.is_retryable() => {
                    return Err(EmbedderError::ServiceUnavailable(format!(
                        "gave up after {} attempts: {e}",
                        attempt + 1
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
