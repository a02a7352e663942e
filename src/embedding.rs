//! Embedding generation adapter.
//!
//! The embedding model itself is an opaque external service reached over
//! HTTP; this module models the contract plus a deterministic fallback
//! used in tests.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::error::{EmbedError, Result};

/// Dimensionality of the shipped embedding model (BGE-M3).
pub const DEFAULT_DIMENSIONS: usize = 1024;

/// Trait for embedding generators.
///
/// Implementations must be thread-safe (`Send + Sync`): the pipeline may
/// call `embed` from many concurrently executing retrieval requests.
pub trait Embedder: Send + Sync {
    /// Returns the embedding dimensionality this embedder produces.
    fn dimensions(&self) -> usize;

    /// Generates an embedding for `text`.
    ///
    /// # Errors
    ///
    /// Implementations that talk to an external service should prefer
    /// fail-soft behavior (return a zero vector and log a warning) over
    /// propagating transport errors, since a single embedding failure
    /// should not abort an entire retrieval request.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generates embeddings for multiple texts.
    ///
    /// The default implementation calls `embed` for each text in turn;
    /// implementations may override this for batch optimization.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Computes cosine similarity between two embedding vectors.
///
/// Returns 0.0 if the vectors have different lengths or either has zero
/// magnitude, rather than panicking or producing NaN.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Calls a remote embedding service's `/api/embeddings` endpoint.
///
/// Per the fail-soft contract, transport or decode failures do not
/// propagate: `embed` logs a warning and returns a zero vector of the
/// configured dimensionality instead.
pub struct HttpEmbedder {
    client: reqwest::blocking::Client,
    base_url: String,
    model_name: String,
    dimensions: usize,
}

impl HttpEmbedder {
    /// Creates a new HTTP-backed embedder.
    #[must_use]
    pub fn new(base_url: impl Into<String>, model_name: impl Into<String>, dimensions: usize) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into(),
            model_name: model_name.into(),
            dimensions,
        }
    }

    fn call(&self, text: &str) -> std::result::Result<Vec<f32>, EmbedError> {
        let url = format!("{}/api/embeddings", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .json(&EmbedRequest {
                model: &self.model_name,
                prompt: text,
            })
            .send()?;

        if !response.status().is_success() {
            return Err(EmbedError::Transport(format!(
                "embedding service returned status {}",
                response.status()
            )));
        }

        let parsed: EmbedResponse = response
            .json()
            .map_err(|e| EmbedError::MalformedResponse(e.to_string()))?;
        if parsed.embedding.len() != self.dimensions {
            return Err(EmbedError::MalformedResponse(format!(
                "expected {} dimensions, got {}",
                self.dimensions,
                parsed.embedding.len()
            )));
        }
        Ok(parsed.embedding)
    }
}

impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.call(text) {
            Ok(vector) => Ok(vector),
            Err(err) => {
                tracing::warn!(error = %err, "embedding request failed, returning zero vector");
                Ok(vec![0.0; self.dimensions])
            }
        }
    }
}

/// Hash-based deterministic pseudo-embedder, used in tests and as a
/// dependency-free stand-in where no embedding service is configured.
///
/// This is lexical-overlap similarity, not semantic similarity.
pub struct FallbackEmbedder {
    dimensions: usize,
}

impl FallbackEmbedder {
    /// Creates a fallback embedder producing vectors of `dimensions` length.
    #[must_use]
    pub const fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    fn hash_string(s: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn generate(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        let normalized: String = text
            .chars()
            .map(|c| if c.is_alphanumeric() || c.is_whitespace() { c.to_ascii_lowercase() } else { ' ' })
            .collect();

        for word in normalized.split_whitespace() {
            let hash = Self::hash_string(word);
            let idx = (hash as usize) % self.dimensions;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        let chars: Vec<char> = normalized.chars().collect();
        if chars.len() >= 3 {
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let hash = Self::hash_string(&trigram);
                let idx = (hash as usize) % self.dimensions;
                let sign = if (hash >> 32) & 1 == 0 { 0.5 } else { -0.5 };
                embedding[idx] += sign;
            }
        }

        let magnitude: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for v in &mut embedding {
                *v /= magnitude;
            }
        }
        embedding
    }
}

impl Embedder for FallbackEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.generate(text))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        use rayon::prelude::*;
        Ok(texts.par_iter().map(|t| self.generate(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical_vectors() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal_vectors() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_mismatched_lengths_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn cosine_similarity_zero_vector_is_zero() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn fallback_embedder_is_deterministic() {
        let e = FallbackEmbedder::new(DEFAULT_DIMENSIONS);
        assert_eq!(e.embed("hồ sơ khai sinh").unwrap(), e.embed("hồ sơ khai sinh").unwrap());
    }

    #[test]
    fn fallback_embedder_produces_unit_vectors() {
        let e = FallbackEmbedder::new(DEFAULT_DIMENSIONS);
        let v = e.embed("giấy tờ tùy thân").unwrap();
        let magnitude: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-5);
    }

    #[test]
    fn fallback_embedder_similar_text_more_similar() {
        let e = FallbackEmbedder::new(DEFAULT_DIMENSIONS);
        let base = e.embed("hồ sơ đăng ký khai sinh").unwrap();
        let similar = e.embed("hồ sơ đăng ký khai tử").unwrap();
        let different = e.embed("lệ phí giao thông đường bộ").unwrap();
        assert!(cosine_similarity(&base, &similar) > cosine_similarity(&base, &different));
    }

    #[test]
    fn fallback_embedder_batch_matches_sequential() {
        let e = FallbackEmbedder::new(DEFAULT_DIMENSIONS);
        let texts = vec!["a", "b", "c"];
        let batch = e.embed_batch(&texts).unwrap();
        assert_eq!(batch.len(), 3);
        for (text, vec) in texts.iter().zip(batch.iter()) {
            assert_eq!(*vec, e.embed(text).unwrap());
        }
    }
}
