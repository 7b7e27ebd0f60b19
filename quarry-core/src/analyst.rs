use std::sync::Arc;

use quarry_context::ContextAssembler;
use quarry_embed::{Embedder, EmbeddingError, HashingEmbedder, HttpEmbedder};
use quarry_exec::{describe_schema, execute_within, QueryExecutor};
use quarry_infer::{CompletionService, HttpChatEngine, QueryGenerator};
use quarry_store::{EmbeddingIndex, StoreRegistry};
use quarry_types::{PlanMode, PlanSession, SchemaDescription, Table, TrainingInput};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::AnalystError;
use crate::planner::{IterativePlanner, PlannerDeps, PlannerLimits, SingleShotPlanner};
use crate::training;
use crate::Settings;

/// Answer to a one-off question: the generated query and what it returned.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AskResult {
    pub question: String,
    pub sql: String,
    pub result: Table,
}

/// Wires knowledge, completion and execution together for one dataset.
pub struct Analyst {
    settings: Settings,
    index: Arc<EmbeddingIndex>,
    engine: Arc<dyn CompletionService>,
    executor: Arc<dyn QueryExecutor>,
    assembler: ContextAssembler,
    generator: QueryGenerator,
}

impl Analyst {
    pub fn new(
        settings: Settings,
        index: Arc<EmbeddingIndex>,
        engine: Arc<dyn CompletionService>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        let assembler = ContextAssembler::new(settings.max_context_chars);
        let generator = QueryGenerator::new(
            Arc::clone(&engine),
            Some(settings.temperature),
            settings.llm_timeout,
        );
        Self {
            settings,
            index,
            engine,
            executor,
            assembler,
            generator,
        }
    }

    /// Build an analyst backed by the configured HTTP completion service.
    pub async fn connect(
        settings: Settings,
        registry: &StoreRegistry,
        executor: Arc<dyn QueryExecutor>,
    ) -> Result<Self, AnalystError> {
        let engine = HttpChatEngine::new(
            settings.require_llm_url()?,
            &settings.llm_model,
            settings.llm_api_key.clone(),
            settings.llm_timeout,
        )?;
        let index = open_index(&settings, registry).await?;
        info!(
            namespace = index.namespace(),
            model = engine.model(),
            "analyst ready"
        );
        Ok(Self::new(settings, Arc::new(index), Arc::new(engine), executor))
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn index(&self) -> &Arc<EmbeddingIndex> {
        &self.index
    }

    pub async fn describe_schema(&self) -> Result<SchemaDescription, AnalystError> {
        Ok(describe_schema(self.executor.as_ref(), self.settings.query_timeout).await?)
    }

    pub async fn train(&self, input: TrainingInput) -> Result<String, AnalystError> {
        Ok(self.index.train(input).await?)
    }

    pub async fn train_from_schema(&self) -> Result<Vec<String>, AnalystError> {
        training::train_from_schema(&self.index, self.executor.as_ref()).await
    }

    pub async fn import_legacy<'a, I>(&self, lines: I) -> Result<Vec<String>, AnalystError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        training::import_legacy(&self.index, lines).await
    }

    /// Schema description plus retrieved knowledge for `question`.
    pub async fn context_for(&self, question: &str) -> Result<String, AnalystError> {
        let schema = self.describe_schema().await?;
        let retrieved = self.index.retrieve(question, self.settings.top_k).await?;
        Ok(self.assembler.build_context(&schema.render(), &retrieved))
    }

    pub async fn generate_sql(&self, question: &str) -> Result<String, AnalystError> {
        let context = self.context_for(question).await?;
        Ok(self.generator.generate(question, &context).await?)
    }

    /// Generate a query for `question` and run it.
    pub async fn ask(&self, question: &str) -> Result<AskResult, AnalystError> {
        let sql = self.generate_sql(question).await?;
        let result =
            execute_within(self.executor.as_ref(), &sql, self.settings.query_timeout).await?;
        Ok(AskResult {
            question: question.to_string(),
            sql,
            result,
        })
    }

    pub fn planner_deps(&self) -> PlannerDeps {
        PlannerDeps {
            engine: Arc::clone(&self.engine),
            executor: Arc::clone(&self.executor),
            index: Arc::clone(&self.index),
            assembler: self.assembler.clone(),
            limits: PlannerLimits::from(&self.settings),
        }
    }

    pub async fn plan_report(
        &self,
        request: &str,
        mode: PlanMode,
        cancel: &CancellationToken,
    ) -> PlanSession {
        match mode {
            PlanMode::Iterative => {
                IterativePlanner::new(self.planner_deps())
                    .run(request, cancel)
                    .await
            }
            PlanMode::SingleShot => {
                SingleShotPlanner::new(self.planner_deps())
                    .run(request, cancel)
                    .await
            }
        }
    }
}

/// Offline hashing embedder unless an embedding endpoint is configured.
pub fn build_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match &settings.embed_api_url {
        Some(url) => Ok(Arc::new(HttpEmbedder::new(
            url.as_str(),
            settings.embed_model.as_str(),
            settings.llm_api_key.clone(),
            settings.embed_dim,
            settings.llm_timeout,
        )?)),
        None => Ok(Arc::new(HashingEmbedder::new(settings.embed_dim))),
    }
}

/// Open the configured namespace and check it matches the embedder width.
pub async fn open_index(
    settings: &Settings,
    registry: &StoreRegistry,
) -> Result<EmbeddingIndex, AnalystError> {
    let store = registry.open(&settings.namespace).await?;
    let index = EmbeddingIndex::new(build_embedder(settings)?, store);
    index.check_dimension().await?;
    Ok(index)
}
