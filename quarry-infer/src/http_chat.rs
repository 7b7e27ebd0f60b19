use std::time::Duration;

use async_trait::async_trait;
use quarry_types::{ChatMessage, CompletionRequest};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{CompletionService, GenerationError};

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Completion service that calls an OpenAI-compatible `/chat/completions`
/// endpoint and returns the first choice.
pub struct HttpChatEngine {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HttpChatEngine {
    /// `api_key` is sent as a bearer token only when present, so
    /// unauthenticated gateways work too.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            timeout,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl CompletionService for HttpChatEngine {
    async fn complete(&self, req: CompletionRequest) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.base_url);

        let body = OpenAIChatRequest {
            model: &self.model,
            messages: &req.messages,
            temperature: req.temperature,
        };

        let mut http = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            http = http.bearer_auth(key);
        }

        let resp = http.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else {
                GenerationError::Transport(e.to_string())
            }
        })?;

        let status = resp.status().as_u16();
        let text = resp.text().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(self.timeout)
            } else {
                GenerationError::Transport(e.to_string())
            }
        })?;
        debug!(status, bytes = text.len(), model = %self.model, "chat completion response");

        decode_completion(status, &text).map_err(|e| {
            warn!(error = %e, "chat completion rejected");
            e
        })
    }
}

/// Interpret a raw `/chat/completions` reply.
pub fn decode_completion(status: u16, body: &str) -> Result<String, GenerationError> {
    if status != 200 {
        return Err(GenerationError::Status {
            status,
            body: body.to_string(),
        });
    }
    if body.trim().is_empty() {
        return Err(GenerationError::Malformed("empty response body".into()));
    }

    let parsed: ChatCompletion =
        serde_json::from_str(body).map_err(|e| GenerationError::Malformed(e.to_string()))?;
    if let Some(err) = parsed.error.filter(|e| !e.is_null()) {
        return Err(GenerationError::Malformed(format!("service reported error: {err}")));
    }

    parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| GenerationError::Malformed("response has no choices".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_choice_content_is_returned() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"SELECT 1"}},{"message":{"content":"SELECT 2"}}]}"#;
        assert_eq!(decode_completion(200, body).unwrap(), "SELECT 1");
    }

    #[test]
    fn non_200_keeps_status_and_body() {
        match decode_completion(429, "rate limited") {
            Err(GenerationError::Status { status, body }) => {
                assert_eq!(status, 429);
                assert_eq!(body, "rate limited");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn error_field_and_missing_choices_are_malformed() {
        let with_error = r#"{"error":{"message":"model overloaded"}}"#;
        assert!(matches!(
            decode_completion(200, with_error),
            Err(GenerationError::Malformed(m)) if m.contains("model overloaded")
        ));
        assert!(matches!(
            decode_completion(200, r#"{"choices":[]}"#),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            decode_completion(200, "  "),
            Err(GenerationError::Malformed(_))
        ));
        assert!(matches!(
            decode_completion(200, "<html>"),
            Err(GenerationError::Malformed(_))
        ));
    }

    #[test]
    fn request_omits_temperature_when_unset() {
        let messages = vec![ChatMessage::user("hi")];
        let body = OpenAIChatRequest {
            model: "gpt-4o-mini",
            messages: &messages,
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert!(json.get("temperature").is_none());
    }
}
