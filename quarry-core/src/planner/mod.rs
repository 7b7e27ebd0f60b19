//! Report planners: break a report request into sub-questions, answer each
//! with one query, and gather the results into a single table.

use std::sync::Arc;
use std::time::Duration;

use lazy_static::lazy_static;
use quarry_context::ContextAssembler;
use quarry_exec::{describe_schema, execute_within, ExecutionError, QueryExecutor};
use quarry_infer::{
    complete_within, fenced_query, json_array_span, json_object_span, strip_reasoning,
    unescape_underscores, CompletionService, GenerationError,
};
use quarry_store::{EmbeddingIndex, IndexError};
use quarry_types::{ChatMessage, CompletionRequest, PlanSession, PlanStep, SOURCE_TAG_COLUMN};
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub mod iterative;
pub use iterative::IterativePlanner;

pub mod single_shot;
pub use single_shot::SingleShotPlanner;

use crate::Settings;

/// Word that ends iterative planning.
pub const TERMINATION_TOKEN: &str = "DONE";

lazy_static! {
    static ref TERMINATION: Regex =
        Regex::new(&format!(r"(?i)\b{}\b", regex::escape(TERMINATION_TOKEN))).unwrap();
}

#[derive(Debug, Error)]
pub enum PlanError {
    #[error("could not describe the database schema: {0}")]
    Schema(#[source] ExecutionError),
    #[error("knowledge retrieval failed: {0}")]
    Knowledge(#[from] IndexError),
    #[error("round {round}: completion failed: {source}")]
    Generation {
        round: usize,
        #[source]
        source: GenerationError,
    },
    #[error("round {round}: could not parse planner response: {reason}")]
    Parse {
        round: usize,
        reason: String,
        raw: String,
    },
    #[error("round {round}: query for \"{subquestion}\" failed: {source}")]
    Execution {
        round: usize,
        subquestion: String,
        #[source]
        source: ExecutionError,
    },
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannerLimits {
    pub max_rounds: usize,
    pub preview_rows: usize,
    pub top_k: usize,
    pub temperature: Option<f32>,
    pub llm_timeout: Duration,
    pub query_timeout: Duration,
}

impl Default for PlannerLimits {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for PlannerLimits {
    fn from(settings: &Settings) -> Self {
        Self {
            max_rounds: settings.max_rounds,
            preview_rows: settings.preview_rows,
            top_k: settings.top_k,
            temperature: Some(settings.temperature),
            llm_timeout: settings.llm_timeout,
            query_timeout: settings.query_timeout,
        }
    }
}

/// Collaborators shared by both planners.
#[derive(Clone)]
pub struct PlannerDeps {
    pub engine: Arc<dyn CompletionService>,
    pub executor: Arc<dyn QueryExecutor>,
    pub index: Arc<EmbeddingIndex>,
    pub assembler: ContextAssembler,
    pub limits: PlannerLimits,
}

/// One `{subquestion, query}` item as proposed by the model.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct StepProposal {
    #[serde(default, alias = "sub_question", alias = "question")]
    pub subquestion: String,
    #[serde(default, alias = "sql")]
    pub query: String,
}

impl StepProposal {
    /// Trim both fields and clean up the query; blank fields are an error.
    pub fn validated(self) -> Result<StepProposal, String> {
        let subquestion = self.subquestion.trim().to_string();
        let query = clean_query(&self.query);
        if subquestion.is_empty() {
            return Err("proposal has an empty subquestion".into());
        }
        if query.is_empty() {
            return Err("proposal has an empty query".into());
        }
        Ok(StepProposal { subquestion, query })
    }
}

impl PlannerDeps {
    /// Schema description plus retrieved knowledge for the request.
    pub(crate) async fn context_for(&self, request: &str) -> Result<String, PlanError> {
        let schema = describe_schema(self.executor.as_ref(), self.limits.query_timeout)
            .await
            .map_err(PlanError::Schema)?;
        let retrieved = self.index.retrieve(request, self.limits.top_k).await?;
        Ok(self.assembler.build_context(&schema.render(), &retrieved))
    }

    /// One completion call, with prompt and response kept on the session.
    pub(crate) async fn consult(
        &self,
        session: &mut PlanSession,
        round: usize,
        messages: Vec<ChatMessage>,
    ) -> Result<String, PlanError> {
        let req = CompletionRequest::new(messages).with_temperature(self.limits.temperature);
        session.diagnostics.last_prompt = Some(req.transcript());
        let raw = complete_within(self.engine.as_ref(), req, self.limits.llm_timeout)
            .await
            .map_err(|source| PlanError::Generation { round, source })?;
        session.diagnostics.last_response = Some(raw.clone());
        Ok(raw)
    }

    pub(crate) async fn execute_step(&self, step: &mut PlanStep) -> Result<(), ExecutionError> {
        match execute_within(self.executor.as_ref(), &step.query, self.limits.query_timeout).await
        {
            Ok(table) => {
                info!(subquestion = %step.subquestion, rows = table.len(), "step executed");
                step.mark_executed(table, self.limits.preview_rows);
                Ok(())
            }
            Err(e) => {
                warn!(subquestion = %step.subquestion, error = %e, "step failed");
                step.mark_failed(e.to_string());
                Err(e)
            }
        }
    }
}

pub(crate) fn record_failure(session: &mut PlanSession, err: &PlanError) {
    error!(session = %session.id, error = %err, "plan session failed");
    session.fail(err.to_string());
}

/// Prior steps as shown to the planner. The row tag column is left out.
/// When the history is longer than `max_chars`, result previews are
/// replaced by a placeholder from the oldest step forward; subquestions,
/// queries and errors always stay.
pub(crate) fn render_steps(steps: &[PlanStep], max_chars: usize) -> String {
    if steps.is_empty() {
        return "(none yet)".to_string();
    }
    let mut blocks: Vec<String> = steps
        .iter()
        .enumerate()
        .map(|(i, step)| render_step(i, step, true))
        .collect();
    let total = |blocks: &[String]| blocks.iter().map(|b| b.chars().count() + 2).sum::<usize>();

    let mut collapsed = 0;
    while total(&blocks) > max_chars && collapsed < steps.len() {
        blocks[collapsed] = render_step(collapsed, &steps[collapsed], false);
        collapsed += 1;
    }
    if collapsed > 0 {
        debug!(collapsed, max_chars, "step history over budget, previews omitted");
    }
    blocks.join("\n\n")
}

fn render_step(i: usize, step: &PlanStep, with_preview: bool) -> String {
    let outcome = match &step.error {
        Some(err) => format!("Error: {err}"),
        None if with_preview => format!(
            "Result preview:\n{}",
            step.preview.without_column(SOURCE_TAG_COLUMN).render_markdown()
        ),
        None => {
            let rows = step.full_result.as_ref().map_or(step.preview.len(), |t| t.len());
            format!("Result: {rows} rows (preview omitted)")
        }
    };
    format!(
        "Step {}: {}\nSQL: {}\n{}",
        i + 1,
        step.subquestion,
        step.query,
        outcome.trim_end()
    )
}

/// `Some(note)` when the response ends planning. The token only counts
/// outside the JSON object of a step proposal; `note` is whatever follows
/// the token, possibly empty.
pub(crate) fn detect_termination(raw: &str) -> Option<String> {
    let text = strip_reasoning(raw);
    let prose = match json_object_span(&text) {
        Some(span) => text.replacen(span, " ", 1),
        None => text.clone(),
    };
    let found = TERMINATION.find(&prose)?;
    let note = prose[found.end()..]
        .trim_start_matches(|c: char| c.is_whitespace() || matches!(c, ':' | '-' | '.' | ','))
        .trim();
    Some(note.to_string())
}

pub(crate) fn parse_step_proposal(raw: &str) -> Result<StepProposal, String> {
    let text = strip_reasoning(raw);
    let span = json_object_span(&text)
        .ok_or_else(|| "no JSON object in response".to_string())?;
    let proposal: StepProposal =
        serde_json::from_str(span).map_err(|e| format!("invalid step JSON: {e}"))?;
    proposal.validated()
}

pub(crate) fn parse_plan(raw: &str) -> Result<Vec<StepProposal>, String> {
    let text = strip_reasoning(raw);
    let span = json_array_span(&text)
        .ok_or_else(|| "no JSON array in response".to_string())?;
    serde_json::from_str(span).map_err(|e| format!("invalid plan JSON: {e}"))
}

fn clean_query(query: &str) -> String {
    let query = fenced_query(query).unwrap_or_else(|| query.trim().to_string());
    unescape_underscores(&query)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_types::Table;
    use serde_json::json;

    #[test]
    fn termination_is_case_insensitive_whole_word() {
        assert_eq!(detect_termination("done"), Some(String::new()));
        assert_eq!(
            detect_termination("We are Done: totals and trends are covered."),
            Some("totals and trends are covered.".into())
        );
        assert_eq!(detect_termination("the data is undone"), None);
        assert_eq!(
            detect_termination(r#"{"subquestion": "Which orders are done?", "query": "SELECT 1"}"#),
            None
        );
        assert_eq!(detect_termination("<think>not DONE yet</think>{\"a\":1}"), None);
    }

    #[test]
    fn proposal_parsing_accepts_fences_and_aliases() {
        let raw = "Next:\n```json\n{\"question\": \" Revenue by month? \", \"sql\": \"SELECT month\\\\_id FROM sales\"}\n```";
        let p = parse_step_proposal(raw).unwrap();
        assert_eq!(p.subquestion, "Revenue by month?");
        assert_eq!(p.query, "SELECT month_id FROM sales");

        assert!(parse_step_proposal("no idea").is_err());
        assert!(parse_step_proposal("{\"subquestion\": \"x\"}").is_err());
        assert!(parse_step_proposal("{not json}").is_err());
    }

    #[test]
    fn plan_parsing_keeps_blank_items_for_later() {
        let plan = parse_plan("[{\"subquestion\": \"a\", \"query\": \"SELECT 1\"}, {\"subquestion\": \"b\"}]")
            .unwrap();
        assert_eq!(plan.len(), 2);
        assert!(plan[1].clone().validated().is_err());
        assert!(parse_plan("{\"subquestion\": \"a\"}").is_err());
    }

    #[test]
    fn rendered_steps_hide_tag_column_and_show_errors() {
        let mut ok = PlanStep::new("How many orders?", "SELECT COUNT(*) AS n FROM orders");
        ok.mark_executed(
            Table {
                columns: vec!["n".into()],
                rows: vec![vec![json!(3)]],
            },
            5,
        );
        let mut bad = PlanStep::new("Broken?", "SELEC");
        bad.mark_failed("sqlite error: near \"SELEC\"");

        let text = render_steps(&[ok, bad], 10_000);
        assert!(text.starts_with("Step 1: How many orders?\nSQL: SELECT COUNT(*) AS n FROM orders"));
        assert!(text.contains("| n |\n| --- |\n| 3 |"));
        assert!(!text.contains(SOURCE_TAG_COLUMN));
        assert!(text.contains("Step 2: Broken?\nSQL: SELEC\nError: sqlite error"));
        assert_eq!(render_steps(&[], 10_000), "(none yet)");
    }

    #[test]
    fn long_history_drops_oldest_previews_first() {
        let step = |q: &str, label: &str| {
            let mut step = PlanStep::new(q, format!("SELECT '{label}' AS v"));
            step.mark_executed(
                Table {
                    columns: vec!["v".into()],
                    rows: vec![vec![json!(label.repeat(40))]; 5],
                },
                5,
            );
            step
        };
        let steps = [step("First?", "aaa"), step("Second?", "bbb"), step("Third?", "ccc")];

        let full = render_steps(&steps, usize::MAX);
        assert!(full.contains(&"aaa".repeat(40)));

        let budget = full.chars().count() - 100;
        let text = render_steps(&steps, budget);
        assert!(text.chars().count() <= budget);
        assert!(text.contains("Step 1: First?\nSQL: SELECT 'aaa' AS v\nResult: 5 rows (preview omitted)"));
        assert!(!text.contains(&"aaa".repeat(40)));
        assert!(text.contains(&"ccc".repeat(40)));

        let tiny = render_steps(&steps, 10);
        assert!(tiny.contains("Step 3: Third?"));
        assert!(!tiny.contains("Result preview"));
    }
}
