use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod http;

pub use http::HttpEmbedder;

pub const DEFAULT_DIM: usize = 384;

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding request failed: {0}")]
    Transport(String),
    #[error("embedding service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed embedding response: {0}")]
    Malformed(String),
    #[error("embedding has {actual} dimensions, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),
}

/// Maps text to a fixed-length vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;
}

/// Signed feature hashing over lower-cased word tokens, L2-normalised.
pub fn embed(text: &str, dim: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; dim];
    if dim == 0 {
        return v;
    }
    for token in tokens(text) {
        let mut hasher = Sha256::new();
        hasher.update(token.as_bytes());
        let digest = hasher.finalize();
        let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]) as usize;
        let sign = if digest[4] % 2 == 0 { 1.0 } else { -1.0 };
        v[bucket % dim] += sign;
    }
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Offline embedder built on [`embed`]. Needs no model or network.
#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIM)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(embed(text, self.dim))
    }
}

/// Cosine similarity; 0.0 when either vector has zero norm or the lengths
/// differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_embedding() {
        let a = embed("hello world", 16);
        let b = embed("hello world", 16);
        assert_eq!(a, b);
    }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        let a = embed("Total revenue, per region?", 64);
        let b = embed("total REVENUE per region", 64);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn zero_norm_and_mismatched_lengths_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(embed("", 8), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn hashing_embedder_reports_its_dimension() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed("orders by month").await.unwrap();
        assert_eq!(v.len(), embedder.dim());
    }
}
