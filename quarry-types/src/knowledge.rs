use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator used by the old single-blob encoding of question/query pairs.
pub const LEGACY_PAIR_DELIMITER: &str = " => ";

/// Category of a stored knowledge entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeKind {
    Ddl,
    Documentation,
    QuestionSql,
}

impl KnowledgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeKind::Ddl => "ddl",
            KnowledgeKind::Documentation => "documentation",
            KnowledgeKind::QuestionSql => "question_sql",
        }
    }
}

impl fmt::Display for KnowledgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown knowledge kind '{0}' (expected ddl, documentation or question_sql)")]
pub struct UnknownKind(pub String);

impl FromStr for KnowledgeKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ddl" => Ok(KnowledgeKind::Ddl),
            "doc" | "docs" | "documentation" => Ok(KnowledgeKind::Documentation),
            "pair" | "sql" | "question_sql" => Ok(KnowledgeKind::QuestionSql),
            other => Err(UnknownKind(other.to_string())),
        }
    }
}

/// Content of a knowledge entry. Question/query pairs keep both halves as
/// separate fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Knowledge {
    Ddl { text: String },
    Documentation { text: String },
    QuestionSql { question: String, sql: String },
}

impl Knowledge {
    pub fn kind(&self) -> KnowledgeKind {
        match self {
            Knowledge::Ddl { .. } => KnowledgeKind::Ddl,
            Knowledge::Documentation { .. } => KnowledgeKind::Documentation,
            Knowledge::QuestionSql { .. } => KnowledgeKind::QuestionSql,
        }
    }

    /// Text fed to the embedder for this entry.
    pub fn embedding_text(&self) -> String {
        match self {
            Knowledge::Ddl { text } | Knowledge::Documentation { text } => text.clone(),
            Knowledge::QuestionSql { question, sql } => format!("{question}\n{sql}"),
        }
    }

    /// Decode the legacy `"question => sql"` blob. The split happens on the
    /// first delimiter, so a question that itself contains the delimiter is
    /// cut short; anything without two non-empty halves is documentation.
    pub fn from_legacy_text(text: &str) -> Self {
        if let Some((question, sql)) = text.split_once(LEGACY_PAIR_DELIMITER) {
            let (question, sql) = (question.trim(), sql.trim());
            if !question.is_empty() && !sql.is_empty() {
                return Knowledge::QuestionSql {
                    question: question.to_string(),
                    sql: sql.to_string(),
                };
            }
        }
        Knowledge::Documentation {
            text: text.trim().to_string(),
        }
    }
}

/// A stored fact plus its embedding. Entries are immutable once stored.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeEntry {
    pub id: String,
    #[serde(flatten)]
    pub knowledge: Knowledge,
    pub embedding: Vec<f32>,
}

impl KnowledgeEntry {
    pub fn kind(&self) -> KnowledgeKind {
        self.knowledge.kind()
    }
}

/// Flat listing row for training data views.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingRecord {
    pub id: String,
    pub kind: KnowledgeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl From<&KnowledgeEntry> for TrainingRecord {
    fn from(entry: &KnowledgeEntry) -> Self {
        let (question, sql, text) = match &entry.knowledge {
            Knowledge::Ddl { text } | Knowledge::Documentation { text } => {
                (None, None, Some(text.clone()))
            }
            Knowledge::QuestionSql { question, sql } => {
                (Some(question.clone()), Some(sql.clone()), None)
            }
        };
        Self {
            id: entry.id.clone(),
            kind: entry.kind(),
            question,
            sql,
            text,
        }
    }
}

/// Loose training payload as accepted from callers: a question with its
/// query, a DDL statement, or a piece of documentation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingInput {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub sql: Option<String>,
    #[serde(default)]
    pub ddl: Option<String>,
    #[serde(default)]
    pub documentation: Option<String>,
}

impl TrainingInput {
    /// Dispatch in priority order: pair, then ddl, then documentation.
    /// Blank fields count as absent.
    pub fn into_knowledge(self) -> Option<Knowledge> {
        let present = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        let question = present(self.question);
        let sql = present(self.sql);
        if let (Some(question), Some(sql)) = (question, sql) {
            return Some(Knowledge::QuestionSql { question, sql });
        }
        if let Some(text) = present(self.ddl) {
            return Some(Knowledge::Ddl { text });
        }
        present(self.documentation).map(|text| Knowledge::Documentation { text })
    }
}

/// One search hit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoredEntry {
    pub id: String,
    #[serde(flatten)]
    pub knowledge: Knowledge,
    pub score: f32,
}

/// Per-kind search hits for one question, each list most relevant first.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrievedKnowledge {
    pub ddl: Vec<ScoredEntry>,
    pub documentation: Vec<ScoredEntry>,
    pub examples: Vec<ScoredEntry>,
}

impl RetrievedKnowledge {
    pub fn is_empty(&self) -> bool {
        self.ddl.is_empty() && self.documentation.is_empty() && self.examples.is_empty()
    }
}
