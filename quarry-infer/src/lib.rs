use std::time::Duration;

use async_trait::async_trait;
use quarry_types::CompletionRequest;
use thiserror::Error;

pub mod extract;
pub use extract::{
    extract_query, fenced_query, json_array_span, json_object_span, strip_reasoning,
    unescape_underscores,
};

pub mod generator;
pub use generator::QueryGenerator;

pub mod http_chat;
pub use http_chat::HttpChatEngine;

pub mod scripted;
pub use scripted::ScriptedEngine;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("completion request failed: {0}")]
    Transport(String),
    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed completion response: {0}")]
    Malformed(String),
    #[error("completion timed out after {0:?}")]
    Timeout(Duration),
    #[error("scripted completion service ran out of responses")]
    Exhausted,
}

/// Text-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, req: CompletionRequest) -> Result<String, GenerationError>;
}

/// Run one completion with an upper bound on wall time.
pub async fn complete_within(
    engine: &dyn CompletionService,
    req: CompletionRequest,
    limit: Duration,
) -> Result<String, GenerationError> {
    tokio::time::timeout(limit, engine.complete(req))
        .await
        .map_err(|_| GenerationError::Timeout(limit))?
}
