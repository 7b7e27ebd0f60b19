use quarry_types::{ChatMessage, PlanMode, PlanSession, PlanStep, SessionState};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::{parse_plan, record_failure, PlanError, PlannerDeps, StepProposal};

const PLANNER_ROLE: &str = "You are a data analyst preparing a report. You break the report \
request into an ordered list of sub-questions, each answered by a single SQL query.";

/// Asks for the whole decomposition in one call, then executes every item.
/// A failing item is recorded and the remaining items still run.
pub struct SingleShotPlanner {
    deps: PlannerDeps,
}

impl SingleShotPlanner {
    pub fn new(deps: PlannerDeps) -> Self {
        Self { deps }
    }

    pub async fn run(&self, request: &str, cancel: &CancellationToken) -> PlanSession {
        let mut session = PlanSession::new(request, PlanMode::SingleShot);
        // The error is recorded on the session.
        let _ = self.drive(&mut session, cancel).await;
        session
    }

    pub async fn drive(
        &self,
        session: &mut PlanSession,
        cancel: &CancellationToken,
    ) -> Result<(), PlanError> {
        let result = self.execute_plan(session, cancel).await;
        if let Err(err) = &result {
            record_failure(session, err);
        }
        result
    }

    /// One completion call returning the ordered proposals. Items are not
    /// validated here.
    pub async fn plan(
        &self,
        session: &mut PlanSession,
        context: &str,
    ) -> Result<Vec<StepProposal>, PlanError> {
        session.rounds = 1;
        session.state = SessionState::Planning;
        let messages = plan_messages(&session.request, context);
        let raw = self.deps.consult(session, 1, messages).await?;
        parse_plan(&raw).map_err(|reason| PlanError::Parse {
            round: 1,
            reason,
            raw,
        })
    }

    async fn execute_plan(
        &self,
        session: &mut PlanSession,
        cancel: &CancellationToken,
    ) -> Result<(), PlanError> {
        if cancel.is_cancelled() {
            session.cancel();
            return Ok(());
        }
        let context = self.deps.context_for(&session.request).await?;
        let proposals = self.plan(session, &context).await?;
        info!(session = %session.id, items = proposals.len(), "plan received");

        session.state = SessionState::Executing;
        for proposal in proposals {
            if cancel.is_cancelled() {
                info!(session = %session.id, "plan session cancelled");
                session.cancel();
                return Ok(());
            }
            let raw_subquestion = proposal.subquestion.trim().to_string();
            let raw_query = proposal.query.trim().to_string();
            match proposal.validated() {
                Ok(valid) => {
                    let mut step = PlanStep::new(valid.subquestion, valid.query);
                    // Failures stay on the step; siblings still run.
                    let _ = self.deps.execute_step(&mut step).await;
                    session.steps.push(step);
                }
                Err(reason) => {
                    let mut step = PlanStep::new(raw_subquestion, raw_query);
                    step.mark_failed(reason);
                    session.steps.push(step);
                }
            }
        }

        session.finish();
        info!(
            session = %session.id,
            rows = session.combined_result.len(),
            "single-shot plan finished"
        );
        Ok(())
    }
}

fn plan_messages(request: &str, context: &str) -> Vec<ChatMessage> {
    let user = format!(
        "Report request:\n{request}\n\n\
         {context}\n\n\
         List every sub-question needed for the report, in order. Reply with only a JSON array \
         of the form\n\
         [{{\"subquestion\": \"<question>\", \"query\": \"<one SQL query answering it>\"}}]"
    );
    vec![ChatMessage::system(PLANNER_ROLE), ChatMessage::user(user)]
}
