/// OpenAI-compatible embedding client.
///
/// Works against `https://api.openai.com/v1` or any endpoint exposing the same
/// `/embeddings` contract. One request per text; retries and concurrency
/// limits live in [`super::retry::ResilientEmbedder`].
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{Embedder, EmbedderError, check_dimensions, validate_input};
use crate::config::EmbeddingConfig;

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    dimensions: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(cfg: &EmbeddingConfig, api_key: String) -> Result<Self, EmbedderError> {
        if api_key.trim().is_empty() {
            return Err(EmbedderError::Configuration("API key is empty".to_string()));
        }
        let timeout = Duration::from_secs(cfg.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbedderError::Configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            dimensions: cfg.dimensions,
            timeout,
        })
    }

    fn map_transport_error(&self, e: reqwest::Error) -> EmbedderError {
        if e.is_timeout() {
            EmbedderError::Timeout(self.timeout)
        } else if e.is_decode() {
            EmbedderError::InvalidResponse(e.to_string())
        } else {
            EmbedderError::ServiceUnavailable(e.to_string())
        }
    }
}

/// Classify a non-success HTTP status into retryable vs permanent failures.
pub(crate) fn classify_status(status: StatusCode, body: &str) -> EmbedderError {
    let detail = format!("{status}: {body}");
    match status {
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => {
            EmbedderError::ServiceUnavailable(detail)
        }
        s if s.is_server_error() => EmbedderError::ServiceUnavailable(detail),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => EmbedderError::Configuration(detail),
        s if s.is_client_error() => EmbedderError::InvalidInput(detail),
        _ => EmbedderError::InvalidResponse(detail),
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let text = validate_input(text)?;
        let url = format!("{}/embeddings", self.endpoint);
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
            encoding_format: "float",
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| self.map_transport_error(e))?;
        let embedding = result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedderError::InvalidResponse("empty data array".to_string()))?;

        check_dimensions(&embedding, self.dimensions)?;
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}
