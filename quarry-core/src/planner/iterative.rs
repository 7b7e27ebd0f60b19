use quarry_types::{ChatMessage, PlanMode, PlanSession, PlanStep, SessionState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{
    detect_termination, parse_step_proposal, record_failure, render_steps, PlanError,
    PlannerDeps, TERMINATION_TOKEN,
};

const PLANNER_ROLE: &str = "You are a data analyst preparing a report. You break the report \
request into sub-questions and answer each one with a single SQL query, one step at a time.";

/// Plans one sub-question per round, executes it, and feeds the result
/// preview into the next round until the model says it is done or the
/// round cap is hit.
pub struct IterativePlanner {
    deps: PlannerDeps,
}

impl IterativePlanner {
    pub fn new(deps: PlannerDeps) -> Self {
        Self { deps }
    }

    /// Run a fresh session to completion. The session comes back in every
    /// outcome; check `state` and `error()` for failures.
    pub async fn run(&self, request: &str, cancel: &CancellationToken) -> PlanSession {
        let mut session = PlanSession::new(request, PlanMode::Iterative);
        // The error is recorded on the session.
        let _ = self.drive(&mut session, cancel).await;
        session
    }

    /// Advance `session` until it reaches a final state.
    pub async fn drive(
        &self,
        session: &mut PlanSession,
        cancel: &CancellationToken,
    ) -> Result<(), PlanError> {
        let result = self.rounds(session, cancel).await;
        if let Err(err) = &result {
            record_failure(session, err);
        }
        result
    }

    async fn rounds(
        &self,
        session: &mut PlanSession,
        cancel: &CancellationToken,
    ) -> Result<(), PlanError> {
        let context = self.deps.context_for(&session.request).await?;
        let max_rounds = self.deps.limits.max_rounds;

        loop {
            if cancel.is_cancelled() {
                info!(session = %session.id, rounds = session.rounds, "plan session cancelled");
                session.cancel();
                return Ok(());
            }
            if session.rounds >= max_rounds {
                warn!(session = %session.id, max_rounds, "round cap reached, forcing termination");
                session.forced_termination = true;
                session.finish();
                return Ok(());
            }

            session.rounds += 1;
            let round = session.rounds;
            session.state = SessionState::Planning;

            let messages = planning_messages(
                &session.request,
                &context,
                &session.steps,
                self.deps.assembler.max_chars(),
            );
            let raw = self.deps.consult(session, round, messages).await?;

            if let Some(note) = detect_termination(&raw) {
                info!(session = %session.id, round, steps = session.steps.len(), "planner finished");
                session.termination_note = Some(note).filter(|n| !n.is_empty());
                session.finish();
                return Ok(());
            }

            let proposal = parse_step_proposal(&raw).map_err(|reason| PlanError::Parse {
                round,
                reason,
                raw: raw.clone(),
            })?;

            session.state = SessionState::Executing;
            info!(session = %session.id, round, subquestion = %proposal.subquestion, "executing step");
            let mut step = PlanStep::new(proposal.subquestion, proposal.query);
            let outcome = self.deps.execute_step(&mut step).await;
            let subquestion = step.subquestion.clone();
            session.steps.push(step);

            if let Err(source) = outcome {
                return Err(PlanError::Execution {
                    round,
                    subquestion,
                    source,
                });
            }
        }
    }
}

fn planning_messages(
    request: &str,
    context: &str,
    steps: &[PlanStep],
    max_chars: usize,
) -> Vec<ChatMessage> {
    let user = format!(
        "Report request:\n{request}\n\n\
         {context}\n\n\
         Steps completed so far:\n{steps}\n\n\
         Decide the next step. If the results gathered so far are enough to write the report, \
         reply with the single word {TERMINATION_TOKEN}, optionally followed by a short reason. \
         Otherwise reply with only a JSON object of the form\n\
         {{\"subquestion\": \"<next question to answer>\", \"query\": \"<one SQL query answering it>\"}}",
        steps = render_steps(steps, max_chars),
    );
    vec![ChatMessage::system(PLANNER_ROLE), ChatMessage::user(user)]
}
