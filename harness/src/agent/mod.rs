//! Scenario run state machine
//!
//! One [`ScenarioAgent::run`] drives a single scenario:
//! 1. `Initialized`: acquire a respondent session and a conversation id
//! 2. `TurnLoop`: ask the backend for the next utterance, send it, record the reply
//! 3. `Fulfilled` or `BudgetExhausted`: the loop ended without error
//! 4. `Judging`: ask the backend for exactly one verdict over the whole history
//! 5. `Completed`
//!
//! Any credential, generation or transport error moves the run to `Failed`
//! and hands the partial state back to the caller.

pub mod prompts;

use crate::respondent::{RespondentError, RespondentTransport};
use crate::scenarios::ScenarioSpec;
use crate::sink::{ResultSink, RunStatus, StatusUpdate, TurnRecord};
use chrono::{DateTime, Utc};
use model::{ConversationState, GenerationRequest, Judgment, ModelError, StructuredGenerator, Turn};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Errors that end a run
#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("could not acquire a respondent session: {0}")]
    Credential(#[source] RespondentError),

    #[error("reasoning backend failed: {0}")]
    Generation(#[from] ModelError),

    #[error("respondent call failed: {0}")]
    Transport(#[source] RespondentError),

    #[error("scenario run panicked: {message}")]
    Panicked { message: String },
}

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Initialized,
    TurnLoop,
    Fulfilled,
    BudgetExhausted,
    Judging,
    Completed,
    Failed,
}

/// Mutable state of one run, owned by the task driving it.
#[derive(Debug, Clone, Serialize)]
pub struct RunState {
    pub run_id: Uuid,
    pub scenario_id: String,
    pub phase: RunPhase,
    pub history: Vec<Turn>,
    pub turn_count: u32,
    pub turn_budget: u32,
    pub fulfilled: bool,
    pub conversation_id: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl RunState {
    pub fn new(spec: &ScenarioSpec) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            scenario_id: spec.id.clone(),
            phase: RunPhase::Initialized,
            history: Vec::new(),
            turn_count: 0,
            turn_budget: spec.turn_budget,
            fulfilled: false,
            conversation_id: None,
            started_at: Utc::now(),
        }
    }

    /// Read-only copy handed to the backend each turn.
    pub fn snapshot(&self) -> ConversationState {
        ConversationState {
            history: self.history.clone(),
            turn_count: self.turn_count,
            max_turns: self.turn_budget,
            fulfilled: self.fulfilled,
        }
    }

    fn has_turns_left(&self) -> bool {
        self.turn_count < self.turn_budget && !self.fulfilled
    }

    fn transition_to(&mut self, phase: RunPhase) {
        debug!(
            scenario_id = %self.scenario_id,
            "State transition: {:?} → {:?}",
            self.phase,
            phase
        );
        self.phase = phase;
    }
}

/// A run that reached a verdict
#[derive(Debug, Clone, Serialize)]
pub struct CompletedRun {
    pub spec_id: String,
    pub state: RunState,
    pub judgment: Judgment,
}

/// A run that ended in `Failed`, with whatever it had accumulated
#[derive(Error, Debug)]
#[error("scenario {} failed after {} turn(s): {}", .state.scenario_id, .state.turn_count, .error)]
pub struct RunFailure {
    pub state: RunState,
    #[source]
    pub error: EvaluationError,
}

/// Instruction templates used by a run
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub actor_instruction: String,
    pub judge_instruction: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            actor_instruction: prompts::ACTOR_INSTRUCTION.to_string(),
            judge_instruction: prompts::JUDGE_INSTRUCTION.to_string(),
        }
    }
}

/// Drives scenario runs against shared backend, respondent and sink handles.
///
/// Holds no per-run state, so one agent can serve any number of concurrent runs.
pub struct ScenarioAgent {
    generator: Arc<dyn StructuredGenerator>,
    respondent: Arc<dyn RespondentTransport>,
    sink: Arc<dyn ResultSink>,
    config: AgentConfig,
}

impl ScenarioAgent {
    pub fn new(
        generator: Arc<dyn StructuredGenerator>,
        respondent: Arc<dyn RespondentTransport>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            generator,
            respondent,
            sink,
            config: AgentConfig::default(),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn sink(&self) -> &Arc<dyn ResultSink> {
        &self.sink
    }

    /// Run one scenario to a verdict or a failure.
    pub async fn run(&self, spec: &ScenarioSpec) -> Result<CompletedRun, RunFailure> {
        let mut state = RunState::new(spec);
        match self.run_with_state(spec, &mut state).await {
            Ok(judgment) => Ok(CompletedRun {
                spec_id: spec.id.clone(),
                state,
                judgment,
            }),
            Err(error) => Err(RunFailure { state, error }),
        }
    }

    /// Run one scenario over caller-owned state.
    ///
    /// Every status update and turn record carries `state.run_id`, and the
    /// state keeps whatever the run accumulated if the future is dropped or
    /// unwinds part way.
    pub async fn run_with_state(
        &self,
        spec: &ScenarioSpec,
        state: &mut RunState,
    ) -> Result<Judgment, EvaluationError> {
        info!(
            scenario_id = %spec.id,
            run_id = %state.run_id,
            turn_budget = spec.turn_budget,
            backend = self.generator.backend_name(),
            "starting scenario run"
        );
        self.report(StatusUpdate::new(state.run_id, &spec.id, RunStatus::Running))
            .await;

        match self.drive(spec, state).await {
            Ok(judgment) => {
                info!(
                    scenario_id = %spec.id,
                    turns = state.turn_count,
                    fulfilled = state.fulfilled,
                    verdict = %judgment.judgment,
                    "scenario run completed"
                );
                self.report(
                    StatusUpdate::new(state.run_id, &spec.id, RunStatus::Completed)
                        .with_verdict(judgment.judgment)
                        .with_reasoning(judgment.evidence_summary.clone()),
                )
                .await;
                Ok(judgment)
            }
            Err(error) => {
                state.transition_to(RunPhase::Failed);
                warn!(
                    scenario_id = %spec.id,
                    turns = state.turn_count,
                    error = %error,
                    "scenario run failed"
                );
                self.report(
                    StatusUpdate::new(state.run_id, &spec.id, RunStatus::Failed)
                        .with_reasoning(error.to_string()),
                )
                .await;
                Err(error)
            }
        }
    }

    async fn drive(
        &self,
        spec: &ScenarioSpec,
        state: &mut RunState,
    ) -> Result<Judgment, EvaluationError> {
        let token = self
            .respondent
            .acquire_session_credential()
            .await
            .map_err(EvaluationError::Credential)?;
        let conversation_id = Uuid::new_v4().to_string();
        state.conversation_id = Some(conversation_id.clone());
        state.transition_to(RunPhase::TurnLoop);

        while state.has_turns_left() {
            state.turn_count += 1;

            let request = GenerationRequest::new(
                spec.scenario.clone(),
                spec.expected_outcome.clone(),
                state.snapshot(),
            );
            let action = self
                .generator
                .generate_next_action(&self.config.actor_instruction, &request)
                .await?;

            info!(
                scenario_id = %spec.id,
                turn = state.turn_count,
                strategy = %action.strategy,
                confidence = %action.confidence,
                fulfilled = action.fulfilled,
                reasoning = %action.reasoning,
                "next action"
            );
            if !action.error_logs.is_empty() {
                debug!(scenario_id = %spec.id, notes = ?action.error_logs, "anomalies noted by backend");
            }

            state.fulfilled = action.fulfilled;

            let utterance = action.next_message.trim();
            if utterance.is_empty() {
                debug!(scenario_id = %spec.id, turn = state.turn_count, "empty utterance, nothing sent");
            } else {
                let reply = self
                    .respondent
                    .send_utterance(&spec.project_id, &token, utterance, &conversation_id)
                    .await
                    .map_err(EvaluationError::Transport)?;

                let turn = Turn {
                    turn: state.history.len() as u32 + 1,
                    user: utterance.to_string(),
                    assistant: reply.display_text(),
                };
                self.record(state, &turn).await;
                state.history.push(turn);
            }
        }

        if state.fulfilled {
            state.transition_to(RunPhase::Fulfilled);
        } else {
            state.transition_to(RunPhase::BudgetExhausted);
        }

        state.transition_to(RunPhase::Judging);
        let judgment = self
            .generator
            .generate_judgment(&self.config.judge_instruction, &state.history, &spec.scenario)
            .await?;
        state.transition_to(RunPhase::Completed);

        Ok(judgment)
    }

    async fn record(&self, state: &RunState, turn: &Turn) {
        let record = TurnRecord {
            run_id: state.run_id,
            scenario_id: state.scenario_id.clone(),
            turn_index: turn.turn,
            outgoing_text: turn.user.clone(),
            incoming_text: turn.assistant.clone(),
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.sink.record_turn(record).await {
            warn!(scenario_id = %state.scenario_id, turn = turn.turn, error = %e, "failed to record turn");
        }
    }

    async fn report(&self, update: StatusUpdate) {
        let scenario_id = update.scenario_id.clone();
        if let Err(e) = self.sink.update_status(update).await {
            warn!(scenario_id = %scenario_id, error = %e, "failed to report run status");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::respondent::{RespondentReply, RespondentResult, SessionToken};
    use crate::sink::{MemorySink, SinkError, SinkResult};
    use async_trait::async_trait;
    use model::{
        Confidence, ContractViolation, ModelResult, NextAction, SafetyCheck, Strategy, Verdict,
    };
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn action(message: &str, fulfilled: bool) -> NextAction {
        NextAction {
            next_message: message.to_string(),
            reasoning: "testing".to_string(),
            fulfilled,
            confidence: Confidence::High,
            strategy: Strategy::Direct,
            safety_check: SafetyCheck::Passed,
            error_logs: vec![],
            adaptation_notes: String::new(),
        }
    }

    fn judgment(verdict: Verdict) -> Judgment {
        Judgment {
            judgment: verdict,
            confidence: Confidence::Medium,
            evidence_summary: "looked fine".to_string(),
            scenario_completion_score: 0.5,
            conversation_quality_score: 0.5,
            performance_breakdown: None,
            flags: None,
            recommendations: None,
        }
    }

    /// Fulfils on a chosen turn (or never) and counts calls.
    struct ScriptedGenerator {
        fulfil_on: Option<u32>,
        empty_on: Option<u32>,
        seen: Mutex<Vec<ConversationState>>,
        judgments: AtomicU32,
        judged_history: Mutex<Vec<Turn>>,
    }

    impl ScriptedGenerator {
        fn new(fulfil_on: Option<u32>) -> Self {
            Self {
                fulfil_on,
                empty_on: None,
                seen: Mutex::new(Vec::new()),
                judgments: AtomicU32::new(0),
                judged_history: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StructuredGenerator for ScriptedGenerator {
        async fn generate_next_action(
            &self,
            _instruction: &str,
            request: &GenerationRequest,
        ) -> ModelResult<NextAction> {
            self.seen.lock().unwrap().push(request.current_state.clone());
            let turn = request.current_state.turn_count;
            if self.empty_on == Some(turn) {
                return Ok(action("   ", false));
            }
            Ok(action(&format!("message {}", turn), self.fulfil_on == Some(turn)))
        }

        async fn generate_judgment(
            &self,
            _instruction: &str,
            conversation: &[Turn],
            _scenario: &str,
        ) -> ModelResult<Judgment> {
            self.judgments.fetch_add(1, Ordering::SeqCst);
            *self.judged_history.lock().unwrap() = conversation.to_vec();
            Ok(judgment(Verdict::Pass))
        }

        fn backend_name(&self) -> &str {
            "scripted"
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl StructuredGenerator for FailingGenerator {
        async fn generate_next_action(
            &self,
            _instruction: &str,
            _request: &GenerationRequest,
        ) -> ModelResult<NextAction> {
            Err(ModelError::from(ContractViolation::schema("missing field `confidence`")))
        }

        async fn generate_judgment(
            &self,
            _instruction: &str,
            _conversation: &[Turn],
            _scenario: &str,
        ) -> ModelResult<Judgment> {
            panic!("judgment must not be requested for a failed run");
        }

        fn backend_name(&self) -> &str {
            "failing"
        }
    }

    #[derive(Default)]
    struct EchoRespondent {
        sent: Mutex<Vec<(String, String)>>,
        fail_credentials: bool,
        fail_on_send: Option<usize>,
    }

    #[async_trait]
    impl RespondentTransport for EchoRespondent {
        async fn acquire_session_credential(&self) -> RespondentResult<SessionToken> {
            if self.fail_credentials {
                return Err(RespondentError::MissingCredentials {
                    missing: vec!["RESPONDENT_CLIENT_ID"],
                });
            }
            Ok(SessionToken::new("token"))
        }

        async fn send_utterance(
            &self,
            _project_id: &str,
            _token: &SessionToken,
            text: &str,
            conversation_id: &str,
        ) -> RespondentResult<RespondentReply> {
            let mut sent = self.sent.lock().unwrap();
            if self.fail_on_send == Some(sent.len() + 1) {
                return Err(RespondentError::Rejected {
                    status: 400,
                    body: "bad request".to_string(),
                });
            }
            sent.push((text.to_string(), conversation_id.to_string()));
            Ok(RespondentReply::text(format!("echo: {}", text)))
        }
    }

    struct BrokenSink;

    #[async_trait]
    impl ResultSink for BrokenSink {
        async fn record_turn(&self, _record: TurnRecord) -> SinkResult<()> {
            Err(SinkError::Unavailable("down".to_string()))
        }

        async fn update_status(&self, _update: StatusUpdate) -> SinkResult<()> {
            Err(SinkError::Unavailable("down".to_string()))
        }
    }

    fn spec(budget: u32) -> ScenarioSpec {
        ScenarioSpec::new("s1", "Check my balance", "Balance is stated", budget, "proj")
    }

    #[tokio::test]
    async fn test_fulfilment_ends_the_loop_early() {
        let generator = Arc::new(ScriptedGenerator::new(Some(2)));
        let respondent = Arc::new(EchoRespondent::default());
        let sink = Arc::new(MemorySink::new());
        let agent = ScenarioAgent::new(generator.clone(), respondent.clone(), sink.clone());

        let run = agent.run(&spec(5)).await.unwrap();
        assert_eq!(run.state.turn_count, 2);
        assert!(run.state.fulfilled);
        assert_eq!(run.state.phase, RunPhase::Completed);
        assert_eq!(generator.judgments.load(Ordering::SeqCst), 1);
        assert_eq!(respondent.sent.lock().unwrap().len(), 2);
        assert_eq!(sink.turns().await.len(), 2);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_still_judges_once() {
        let generator = Arc::new(ScriptedGenerator::new(None));
        let agent = ScenarioAgent::new(
            generator.clone(),
            Arc::new(EchoRespondent::default()),
            Arc::new(MemorySink::new()),
        );

        let run = agent.run(&spec(3)).await.unwrap();
        assert_eq!(run.state.turn_count, 3);
        assert!(!run.state.fulfilled);
        assert_eq!(generator.judgments.load(Ordering::SeqCst), 1);
        assert_eq!(generator.judged_history.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_snapshots_grow_turn_by_turn() {
        let generator = Arc::new(ScriptedGenerator::new(None));
        let agent = ScenarioAgent::new(
            generator.clone(),
            Arc::new(EchoRespondent::default()),
            Arc::new(MemorySink::new()),
        );
        agent.run(&spec(3)).await.unwrap();

        let seen = generator.seen.lock().unwrap();
        let counts: Vec<(u32, usize)> = seen
            .iter()
            .map(|state| (state.turn_count, state.history.len()))
            .collect();
        assert_eq!(counts, vec![(1, 0), (2, 1), (3, 2)]);
        assert!(seen.iter().all(|state| state.max_turns == 3 && !state.fulfilled));
        assert_eq!(seen[2].history[1].assistant, "echo: message 2");
    }

    #[tokio::test]
    async fn test_empty_utterance_is_counted_but_not_sent() {
        let mut generator = ScriptedGenerator::new(None);
        generator.empty_on = Some(2);
        let generator = Arc::new(generator);
        let respondent = Arc::new(EchoRespondent::default());
        let agent = ScenarioAgent::new(
            generator.clone(),
            respondent.clone(),
            Arc::new(MemorySink::new()),
        );

        let run = agent.run(&spec(3)).await.unwrap();
        assert_eq!(run.state.turn_count, 3);
        assert_eq!(respondent.sent.lock().unwrap().len(), 2);
        let indices: Vec<u32> = run.state.history.iter().map(|t| t.turn).collect();
        assert_eq!(indices, vec![1, 2]);
        assert_eq!(run.state.history[1].user, "message 3");
    }

    #[tokio::test]
    async fn test_conversation_id_is_stable_for_the_run() {
        let respondent = Arc::new(EchoRespondent::default());
        let agent = ScenarioAgent::new(
            Arc::new(ScriptedGenerator::new(None)),
            respondent.clone(),
            Arc::new(MemorySink::new()),
        );
        let run = agent.run(&spec(3)).await.unwrap();

        let sent = respondent.sent.lock().unwrap();
        let conversation_id = run.state.conversation_id.unwrap();
        assert!(sent.iter().all(|(_, id)| *id == conversation_id));
    }

    #[tokio::test]
    async fn test_credential_failure_fails_before_any_turn() {
        let generator = Arc::new(ScriptedGenerator::new(None));
        let respondent = Arc::new(EchoRespondent {
            fail_credentials: true,
            ..EchoRespondent::default()
        });
        let sink = Arc::new(MemorySink::new());
        let agent = ScenarioAgent::new(generator.clone(), respondent, sink.clone());

        let failure = agent.run(&spec(3)).await.unwrap_err();
        assert!(matches!(failure.error, EvaluationError::Credential(_)));
        assert_eq!(failure.state.turn_count, 0);
        assert_eq!(failure.state.phase, RunPhase::Failed);
        assert!(failure.state.conversation_id.is_none());
        assert!(generator.seen.lock().unwrap().is_empty());
        assert_eq!(generator.judgments.load(Ordering::SeqCst), 0);

        let status = sink.latest_status("s1").await.unwrap();
        assert_eq!(status.status, RunStatus::Failed);
        assert!(status.verdict.is_none());
    }

    #[tokio::test]
    async fn test_contract_violation_fails_the_run() {
        let agent = ScenarioAgent::new(
            Arc::new(FailingGenerator),
            Arc::new(EchoRespondent::default()),
            Arc::new(MemorySink::new()),
        );

        let failure = agent.run(&spec(3)).await.unwrap_err();
        match &failure.error {
            EvaluationError::Generation(err) => assert!(err.contract_violation().is_some()),
            other => panic!("expected generation error, got {:?}", other),
        }
        assert_eq!(failure.state.turn_count, 1);
        assert!(failure.state.history.is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_partial_history() {
        let generator = Arc::new(ScriptedGenerator::new(None));
        let respondent = Arc::new(EchoRespondent {
            fail_on_send: Some(2),
            ..EchoRespondent::default()
        });
        let agent = ScenarioAgent::new(generator.clone(), respondent, Arc::new(MemorySink::new()));

        let failure = agent.run(&spec(5)).await.unwrap_err();
        assert!(matches!(
            failure.error,
            EvaluationError::Transport(RespondentError::Rejected { status: 400, .. })
        ));
        assert_eq!(failure.state.turn_count, 2);
        assert_eq!(failure.state.history.len(), 1);
        assert_eq!(generator.judgments.load(Ordering::SeqCst), 0);
        assert!(failure.to_string().contains("s1"));
    }

    #[tokio::test]
    async fn test_sink_failures_do_not_fail_the_run() {
        let agent = ScenarioAgent::new(
            Arc::new(ScriptedGenerator::new(Some(1))),
            Arc::new(EchoRespondent::default()),
            Arc::new(BrokenSink),
        );
        let run = agent.run(&spec(2)).await.unwrap();
        assert_eq!(run.judgment.judgment, Verdict::Pass);
    }

    #[tokio::test]
    async fn test_completed_status_carries_verdict_and_evidence() {
        let sink = Arc::new(MemorySink::new());
        let agent = ScenarioAgent::new(
            Arc::new(ScriptedGenerator::new(Some(1))),
            Arc::new(EchoRespondent::default()),
            sink.clone(),
        );
        let run = agent.run(&spec(2)).await.unwrap();

        let statuses = sink.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].status, RunStatus::Running);
        assert_eq!(statuses[1].status, RunStatus::Completed);
        assert_eq!(statuses[1].verdict, Some(Verdict::Pass));
        assert_eq!(statuses[1].reasoning.as_deref(), Some("looked fine"));
        assert!(statuses.iter().all(|s| s.run_id == run.state.run_id));

        let turns = sink.turns().await;
        assert_eq!(turns[0].outgoing_text, "message 1");
        assert_eq!(turns[0].incoming_text, "echo: message 1");
    }

    #[tokio::test]
    async fn test_caller_owned_state_keeps_its_run_id_on_failure() {
        let sink = Arc::new(MemorySink::new());
        let agent = ScenarioAgent::new(
            Arc::new(ScriptedGenerator::new(None)),
            Arc::new(EchoRespondent {
                fail_on_send: Some(2),
                ..EchoRespondent::default()
            }),
            sink.clone(),
        );
        let mut state = RunState::new(&spec(5));
        let run_id = state.run_id;

        let error = agent.run_with_state(&spec(5), &mut state).await.unwrap_err();
        assert!(matches!(error, EvaluationError::Transport(_)));
        assert_eq!(state.run_id, run_id);
        assert_eq!(state.phase, RunPhase::Failed);
        assert_eq!(state.turn_count, 2);
        assert_eq!(state.history.len(), 1);

        let statuses = sink.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert!(statuses.iter().all(|s| s.run_id == run_id));
        assert!(sink.turns().await.iter().all(|t| t.run_id == run_id));
    }
}
