use std::sync::Arc;

use quarry_embed::{cosine_similarity, Embedder};
use quarry_types::{
    Knowledge, KnowledgeEntry, KnowledgeKind, RetrievedKnowledge, ScoredEntry, TrainingInput,
    TrainingRecord,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{FileKnowledgeStore, IndexError};

/// Similarity search over one namespace's knowledge.
pub struct EmbeddingIndex {
    embedder: Arc<dyn Embedder>,
    store: Arc<FileKnowledgeStore>,
}

impl EmbeddingIndex {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<FileKnowledgeStore>) -> Self {
        Self { embedder, store }
    }

    pub fn store(&self) -> &Arc<FileKnowledgeStore> {
        &self.store
    }

    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    /// Fails when the stored entries were embedded with a different width
    /// than the configured embedder produces.
    pub async fn check_dimension(&self) -> Result<(), IndexError> {
        match self.store.dim().await {
            Some(store) if store != self.embedder.dim() => Err(IndexError::DimensionMismatch {
                embedder: self.embedder.dim(),
                store,
            }),
            _ => Ok(()),
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, IndexError> {
        Ok(self.embedder.embed(text).await?)
    }

    /// Embed and persist one piece of knowledge, returning its new id.
    pub async fn add(&self, knowledge: Knowledge) -> Result<String, IndexError> {
        self.check_dimension().await?;
        let embedding = self.embed(&knowledge.embedding_text()).await?;
        let id = Uuid::new_v4().to_string();
        let kind = knowledge.kind();
        self.store
            .insert(KnowledgeEntry {
                id: id.clone(),
                knowledge,
                embedding,
            })
            .await?;
        info!(namespace = self.namespace(), %kind, %id, "added knowledge");
        Ok(id)
    }

    pub async fn add_ddl(&self, ddl: impl Into<String>) -> Result<String, IndexError> {
        self.add(Knowledge::Ddl { text: ddl.into() }).await
    }

    pub async fn add_documentation(&self, text: impl Into<String>) -> Result<String, IndexError> {
        self.add(Knowledge::Documentation { text: text.into() }).await
    }

    pub async fn add_question_sql(
        &self,
        question: impl Into<String>,
        sql: impl Into<String>,
    ) -> Result<String, IndexError> {
        self.add(Knowledge::QuestionSql {
            question: question.into(),
            sql: sql.into(),
        })
        .await
    }

    pub async fn train(&self, input: TrainingInput) -> Result<String, IndexError> {
        let knowledge = input.into_knowledge().ok_or(IndexError::InvalidTraining)?;
        self.add(knowledge).await
    }

    pub async fn remove(&self, id: &str) -> Result<bool, IndexError> {
        Ok(self.store.remove(id).await?)
    }

    /// Drop every entry of the namespace. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize, IndexError> {
        let removed = self.store.clear().await?;
        info!(namespace = self.namespace(), removed, "cleared knowledge");
        Ok(removed)
    }

    pub async fn get_all(&self) -> Vec<TrainingRecord> {
        self.store.get_all().await
    }

    /// Top `k` entries by cosine similarity, most similar first. Equal
    /// scores keep insertion order.
    pub async fn search(
        &self,
        query: &str,
        kind: Option<KnowledgeKind>,
        k: usize,
    ) -> Result<Vec<ScoredEntry>, IndexError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_embedding = self.embed(query).await?;

        let hits = self
            .store
            .with_entries(|entries| {
                let mut scored: Vec<(usize, f32)> = entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| kind.map_or(true, |want| e.kind() == want))
                    .map(|(i, e)| (i, cosine_similarity(&query_embedding, &e.embedding)))
                    .collect();
                scored.sort_by(|a, b| b.1.total_cmp(&a.1));
                scored.truncate(k);
                scored
                    .into_iter()
                    .map(|(i, score)| ScoredEntry {
                        id: entries[i].id.clone(),
                        knowledge: entries[i].knowledge.clone(),
                        score,
                    })
                    .collect::<Vec<_>>()
            })
            .await;

        debug!(namespace = self.namespace(), kind = ?kind, hits = hits.len(), "knowledge search");
        Ok(hits)
    }

    /// Like [`search`](Self::search) but returns only the entry texts.
    pub async fn search_text(
        &self,
        query: &str,
        kind: Option<KnowledgeKind>,
        k: usize,
    ) -> Result<Vec<String>, IndexError> {
        Ok(self
            .search(query, kind, k)
            .await?
            .into_iter()
            .map(|hit| hit.knowledge.embedding_text())
            .collect())
    }

    /// One search per kind, as used to build generation context.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<RetrievedKnowledge, IndexError> {
        Ok(RetrievedKnowledge {
            ddl: self.search(question, Some(KnowledgeKind::Ddl), k).await?,
            documentation: self
                .search(question, Some(KnowledgeKind::Documentation), k)
                .await?,
            examples: self
                .search(question, Some(KnowledgeKind::QuestionSql), k)
                .await?,
        })
    }
}
