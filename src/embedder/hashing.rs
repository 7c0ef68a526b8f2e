/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed with BLAKE3 into a signed
/// bucket, so texts sharing words land close in cosine space. Needs no model
/// files or network and is stable across builds and platforms, which makes
/// it usable for offline indexes and for tests.
use async_trait::async_trait;

use super::{Embedder, EmbedderError, l2_normalize, validate_input};

pub const HASHING_MODEL_ID: &str = "hashing-v1";

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> (usize, f32) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let mut idx = [0u8; 8];
        idx.copy_from_slice(&bytes[..8]);
        let slot = (u64::from_le_bytes(idx) % self.dimensions as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        (slot, sign)
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self { dimensions: 384 }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedderError> {
        let text = validate_input(text)?;

        let mut embedding = vec![0.0f32; self.dimensions];
        for token in &tokenize(text) {
            let (slot, sign) = self.bucket(token);
            embedding[slot] += sign;
        }
        if embedding.iter().all(|v| *v == 0.0) {
            // no tokens, or tokens whose signed buckets cancel out
            let (slot, sign) = self.bucket(text);
            embedding[slot] = sign;
        }

        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_id(&self) -> &str {
        HASHING_MODEL_ID
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[tokio::test]
    async fn test_embed_dimensions() {
        let embedder = HashingEmbedder::new(384);
        let result = embedder.embed("hello world").await.unwrap();
        assert_eq!(result.len(), 384);
    }

    #[tokio::test]
    async fn test_embed_deterministic() {
        let embedder = HashingEmbedder::new(384);
        let a = embedder.embed("The Cell Cycle").await.unwrap();
        let b = embedder.embed("The Cell Cycle").await.unwrap();
        assert_eq!(a, b, "same input should produce same output");
    }

    #[tokio::test]
    async fn test_embed_case_and_punctuation_insensitive() {
        let embedder = HashingEmbedder::new(384);
        let a = embedder.embed("cell cycle").await.unwrap();
        let b = embedder.embed("Cell, CYCLE!").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_embed_normalized() {
        let embedder = HashingEmbedder::new(384);
        let vec = embedder.embed("test normalization").await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!(
            (norm - 1.0).abs() < 0.01,
            "vector should be approximately unit length, got {norm}"
        );
    }

    #[tokio::test]
    async fn test_shared_words_are_closer() {
        let embedder = HashingEmbedder::new(384);
        let query = embedder.embed("The Cell Cycle").await.unwrap();
        let related = embedder
            .embed("Foundation 2: Cells: The cell cycle - Phases of mitosis")
            .await
            .unwrap();
        let unrelated = embedder
            .embed("Foundation 4: Kinematics - Projectile motion")
            .await
            .unwrap();
        assert!(cosine(&query, &related) > cosine(&query, &unrelated));
    }

    #[tokio::test]
    async fn test_punctuation_only_is_nonzero() {
        let embedder = HashingEmbedder::new(32);
        let vec = embedder.embed("?!").await.unwrap();
        assert!(vec.iter().any(|v| *v != 0.0));
    }

    #[tokio::test]
    async fn test_cancelling_tokens_are_nonzero() {
        let embedder = HashingEmbedder::new(8);
        let (slot, sign) = embedder.bucket("gas");
        let partner = (0..10_000)
            .map(|i| format!("gas{i}"))
            .find(|t| embedder.bucket(t) == (slot, -sign))
            .unwrap();

        let text = format!("gas {partner}");
        let vec = embedder.embed(&text).await.unwrap();
        let norm: f32 = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01, "'{text}' embedded to norm {norm}");
        assert_eq!(vec, embedder.embed(&text).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_rejected() {
        let embedder = HashingEmbedder::default();
        assert!(matches!(
            embedder.embed("   ").await,
            Err(EmbedderError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_default_dimensions() {
        let embedder = HashingEmbedder::default();
        assert_eq!(embedder.dimensions(), 384);
        assert_eq!(embedder.model_id(), HASHING_MODEL_ID);
    }
}
