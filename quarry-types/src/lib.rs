use serde::{Deserialize, Serialize};

pub mod knowledge;
pub mod plan;
pub mod schema;
pub mod table;

pub use knowledge::{
    Knowledge, KnowledgeEntry, KnowledgeKind, RetrievedKnowledge, ScoredEntry, TrainingInput,
    TrainingRecord, UnknownKind, LEGACY_PAIR_DELIMITER,
};
pub use plan::{Diagnostics, PlanMode, PlanSession, PlanStep, SessionState, StepStatus};
pub use schema::{ColumnInfo, SchemaDescription, TableSchema};
pub use table::{Table, SOURCE_TAG_COLUMN};

/// One message in a chat-style completion request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// Single completion request handed to the completion service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            temperature: None,
        }
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    /// Concatenated text of every message; handy for logging and assertions.
    pub fn transcript(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}
