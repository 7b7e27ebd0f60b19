use std::collections::VecDeque;

use async_trait::async_trait;
use quarry_types::CompletionRequest;
use tokio::sync::Mutex;

use crate::{CompletionService, GenerationError};

/// Replays canned responses in order and records every request it sees.
/// Used for demos and tests in place of a live model.
pub struct ScriptedEngine {
    responses: Mutex<VecDeque<String>>,
    repeat_last: bool,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedEngine {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every request with the same text, forever.
    pub fn repeating(response: impl Into<String>) -> Self {
        Self {
            repeat_last: true,
            ..Self::new([response])
        }
    }

    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.responses.lock().await.len()
    }
}

#[async_trait]
impl CompletionService for ScriptedEngine {
    async fn complete(&self, req: CompletionRequest) -> Result<String, GenerationError> {
        self.requests.lock().await.push(req);
        let mut responses = self.responses.lock().await;
        if self.repeat_last && responses.len() == 1 {
            return responses.front().cloned().ok_or(GenerationError::Exhausted);
        }
        responses.pop_front().ok_or(GenerationError::Exhausted)
    }
}
