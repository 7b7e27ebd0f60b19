use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Embedder, EmbeddingError};

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

/// Embedder backed by an OpenAI-compatible `/embeddings` endpoint.
pub struct HttpEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
    timeout: Duration,
}

impl HttpEmbedder {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dim: usize,
        timeout: Duration,
    ) -> Result<Self, EmbeddingError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dim,
            timeout,
        })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/embeddings", self.base_url);
        let mut req = self.client.post(&url).json(&EmbeddingRequest {
            model: &self.model,
            input: text,
        });
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                EmbeddingError::Timeout(self.timeout)
            } else {
                EmbeddingError::Transport(e.to_string())
            }
        })?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| EmbeddingError::Transport(e.to_string()))?;
        debug!(status, bytes = body.len(), "embedding response");

        decode_embedding(status, &body, self.dim)
    }
}

fn decode_embedding(status: u16, body: &str, dim: usize) -> Result<Vec<f32>, EmbeddingError> {
    if status != 200 {
        return Err(EmbeddingError::Status {
            status,
            body: body.to_string(),
        });
    }
    let parsed: EmbeddingResponse =
        serde_json::from_str(body).map_err(|e| EmbeddingError::Malformed(e.to_string()))?;
    let embedding = parsed
        .data
        .into_iter()
        .next()
        .map(|d| d.embedding)
        .ok_or_else(|| EmbeddingError::Malformed("response has no data".into()))?;
    if embedding.len() != dim {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dim,
            actual: embedding.len(),
        });
    }
    Ok(embedding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_first_embedding() {
        let v = decode_embedding(200, r#"{"data":[{"embedding":[0.1,0.2]}]}"#, 2).unwrap();
        assert_eq!(v, vec![0.1, 0.2]);
    }

    #[test]
    fn rejects_bad_responses() {
        assert!(matches!(
            decode_embedding(503, "busy", 2),
            Err(EmbeddingError::Status { status: 503, .. })
        ));
        assert!(matches!(
            decode_embedding(200, r#"{"data":[]}"#, 2),
            Err(EmbeddingError::Malformed(_))
        ));
        assert!(matches!(
            decode_embedding(200, r#"{"data":[{"embedding":[1.0]}]}"#, 2),
            Err(EmbeddingError::DimensionMismatch {
                expected: 2,
                actual: 1
            })
        ));
    }
}
