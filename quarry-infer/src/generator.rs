use std::sync::Arc;
use std::time::Duration;

use quarry_context::render_prompt;
use quarry_types::CompletionRequest;
use tracing::{debug, info};

use crate::{complete_within, extract_query, CompletionService, GenerationError};

/// Turns a question plus assembled context into a query string.
///
/// The model output is only cleaned up, never validated; a response that
/// contains no recognisable query comes back as trimmed text.
#[derive(Clone)]
pub struct QueryGenerator {
    engine: Arc<dyn CompletionService>,
    temperature: Option<f32>,
    timeout: Duration,
}

impl QueryGenerator {
    pub fn new(
        engine: Arc<dyn CompletionService>,
        temperature: Option<f32>,
        timeout: Duration,
    ) -> Self {
        Self {
            engine,
            temperature,
            timeout,
        }
    }

    pub async fn generate(&self, question: &str, context: &str) -> Result<String, GenerationError> {
        let req = CompletionRequest::new(render_prompt(question, context))
            .with_temperature(self.temperature);
        let raw = complete_within(self.engine.as_ref(), req, self.timeout).await?;
        debug!(raw_len = raw.len(), "generation response");

        let sql = extract_query(&raw);
        info!(question, sql = %sql, "generated query");
        Ok(sql)
    }
}
