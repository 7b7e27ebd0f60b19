use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::table::{Table, SOURCE_TAG_COLUMN};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    /// Plan one sub-question at a time, feeding results back.
    #[default]
    Iterative,
    /// Ask for the whole decomposition up front.
    SingleShot,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Executed,
    Failed,
}

/// One decomposed sub-question and the query that answers it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub subquestion: String,
    pub query: String,
    pub status: StepStatus,
    /// First rows of the tagged result, shown back to the planner.
    pub preview: Table,
    /// Complete tagged result; kept in memory only.
    #[serde(skip)]
    pub full_result: Option<Table>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PlanStep {
    pub fn new(subquestion: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            subquestion: subquestion.into(),
            query: query.into(),
            status: StepStatus::Pending,
            preview: Table::default(),
            full_result: None,
            error: None,
        }
    }

    pub fn mark_executed(&mut self, result: Table, preview_rows: usize) {
        let tagged = result.with_tag_column(SOURCE_TAG_COLUMN, &self.subquestion);
        self.preview = tagged.preview(preview_rows);
        self.full_result = Some(tagged);
        self.status = StepStatus::Executed;
        self.error = None;
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn is_executed(&self) -> bool {
        self.status == StepStatus::Executed
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Planning,
    Executing,
    Terminated,
    Failed,
    Cancelled,
}

/// Last exchange with the completion service, kept for post-mortems.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub last_prompt: Option<String>,
    pub last_response: Option<String>,
    pub last_error: Option<String>,
}

/// State of one report-planning run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlanSession {
    pub id: Uuid,
    pub request: String,
    pub mode: PlanMode,
    pub steps: Vec<PlanStep>,
    pub combined_result: Table,
    pub state: SessionState,
    /// Planning rounds consumed so far.
    pub rounds: usize,
    /// True when the round cap ended the session instead of the planner.
    pub forced_termination: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination_note: Option<String>,
    pub diagnostics: Diagnostics,
}

impl PlanSession {
    pub fn new(request: impl Into<String>, mode: PlanMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            request: request.into(),
            mode,
            steps: Vec::new(),
            combined_result: Table::default(),
            state: SessionState::Planning,
            rounds: 0,
            forced_termination: false,
            termination_note: None,
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn terminated(&self) -> bool {
        self.state == SessionState::Terminated
    }

    pub fn error(&self) -> Option<&str> {
        match self.state {
            SessionState::Failed => self.diagnostics.last_error.as_deref(),
            _ => None,
        }
    }

    pub fn executed_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.is_executed())
    }

    /// Close the session and build the combined result from every executed
    /// step.
    pub fn finish(&mut self) {
        self.combined_result = Table::concat(
            self.executed_steps()
                .filter_map(|s| s.full_result.as_ref()),
        );
        self.state = SessionState::Terminated;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.diagnostics.last_error = Some(error.into());
        self.state = SessionState::Failed;
    }

    pub fn cancel(&mut self) {
        self.state = SessionState::Cancelled;
    }
}
