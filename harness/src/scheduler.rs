//! Bounded-concurrency execution of many scenario runs.
//!
//! A fixed pool of workers pulls scenario indices from a queue that is closed
//! once every index is enqueued. Each run is spawned on its own task, so a
//! failing or panicking scenario only ever affects its own result slot.
//! Results come back in input order regardless of completion order.

use crate::agent::{CompletedRun, EvaluationError, RunFailure, RunPhase, RunState, ScenarioAgent};
use crate::config::SchedulerConfig;
use crate::scenarios::{ScenarioError, ScenarioSpec};
use crate::sink::{RunStatus, StatusUpdate};
use model::{Judgment, Turn, Verdict};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("got {scenarios} scenario(s) but {expected_outcomes} expected outcome(s)")]
    LengthMismatch {
        scenarios: usize,
        expected_outcomes: usize,
    },

    #[error(transparent)]
    InvalidScenario(#[from] ScenarioError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// What happened to one input scenario.
#[derive(Debug)]
pub enum ScenarioOutcome {
    Completed(CompletedRun),
    Failed(RunFailure),
    /// Never dispatched because the batch was cancelled first.
    NotRun { spec_id: String },
}

impl ScenarioOutcome {
    pub fn spec_id(&self) -> &str {
        match self {
            ScenarioOutcome::Completed(run) => &run.spec_id,
            ScenarioOutcome::Failed(failure) => &failure.state.scenario_id,
            ScenarioOutcome::NotRun { spec_id } => spec_id,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            ScenarioOutcome::Completed(_) => RunStatus::Completed,
            ScenarioOutcome::Failed(_) => RunStatus::Failed,
            ScenarioOutcome::NotRun { .. } => RunStatus::NotRun,
        }
    }

    pub fn verdict(&self) -> Option<Verdict> {
        match self {
            ScenarioOutcome::Completed(run) => Some(run.judgment.judgment),
            _ => None,
        }
    }

    pub fn report(&self) -> OutcomeReport {
        let (state, judgment, error) = match self {
            ScenarioOutcome::Completed(run) => (Some(&run.state), Some(run.judgment.clone()), None),
            ScenarioOutcome::Failed(failure) => {
                (Some(&failure.state), None, Some(failure.error.to_string()))
            }
            ScenarioOutcome::NotRun { .. } => (None, None, None),
        };

        OutcomeReport {
            scenario_id: self.spec_id().to_string(),
            status: self.status(),
            verdict: self.verdict(),
            turn_count: state.map_or(0, |s| s.turn_count),
            fulfilled: state.is_some_and(|s| s.fulfilled),
            judgment,
            error,
            history: state.map(|s| s.history.clone()).unwrap_or_default(),
        }
    }
}

/// Serializable view of a [`ScenarioOutcome`] for CLI output.
#[derive(Debug, Clone, Serialize)]
pub struct OutcomeReport {
    pub scenario_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    pub turn_count: u32,
    pub fulfilled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub history: Vec<Turn>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub human_review: usize,
    pub errored: usize,
    pub not_run: usize,
}

impl BatchSummary {
    pub fn from_outcomes(outcomes: &[ScenarioOutcome]) -> Self {
        let mut summary = BatchSummary {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome {
                ScenarioOutcome::Completed(run) => match run.judgment.judgment {
                    Verdict::Pass => summary.passed += 1,
                    Verdict::Fail => summary.failed += 1,
                    Verdict::HumanReview => summary.human_review += 1,
                },
                ScenarioOutcome::Failed(_) => summary.errored += 1,
                ScenarioOutcome::NotRun { .. } => summary.not_run += 1,
            }
        }
        summary
    }
}

pub struct Scheduler {
    agent: Arc<ScenarioAgent>,
    config: SchedulerConfig,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(agent: Arc<ScenarioAgent>, config: SchedulerConfig) -> Self {
        Self {
            agent,
            config,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that stops the dispatch of further scenarios when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run scenario texts paired 1:1 with expected outcomes, using the
    /// configured default turn budget. Ids are `scenario-1`, `scenario-2`, ...
    pub async fn run_batch(
        &self,
        project_id: &str,
        scenarios: &[String],
        expected_outcomes: &[String],
    ) -> SchedulerResult<Vec<ScenarioOutcome>> {
        if scenarios.len() != expected_outcomes.len() {
            return Err(SchedulerError::LengthMismatch {
                scenarios: scenarios.len(),
                expected_outcomes: expected_outcomes.len(),
            });
        }

        let specs = scenarios
            .iter()
            .zip(expected_outcomes)
            .enumerate()
            .map(|(i, (scenario, expected))| {
                ScenarioSpec::new(
                    format!("scenario-{}", i + 1),
                    scenario.clone(),
                    expected.clone(),
                    self.config.default_turn_budget,
                    project_id,
                )
            })
            .collect();

        self.run_specs(specs).await
    }

    /// Run every spec and return one outcome per spec, in input order.
    pub async fn run_specs(&self, specs: Vec<ScenarioSpec>) -> SchedulerResult<Vec<ScenarioOutcome>> {
        for spec in &specs {
            spec.validate()?;
        }
        if specs.is_empty() {
            return Ok(Vec::new());
        }

        let total = specs.len();
        let specs = Arc::new(specs);
        let workers = self.config.concurrency.max(1).min(total);
        info!(scenarios = total, workers, "dispatching scenario batch");

        let (tx, rx) = mpsc::unbounded_channel::<usize>();
        for index in 0..total {
            if tx.send(index).is_err() {
                break;
            }
        }
        drop(tx);
        let queue = Arc::new(Mutex::new(rx));

        let mut pool = JoinSet::new();
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let specs = Arc::clone(&specs);
            let agent = Arc::clone(&self.agent);
            let cancel = self.cancel.clone();

            pool.spawn(async move {
                let mut finished = Vec::new();
                loop {
                    let next = {
                        let mut queue = queue.lock().await;
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => None,
                            index = queue.recv() => index,
                        }
                    };
                    let Some(index) = next else { break };

                    debug!(worker, index, scenario_id = %specs[index].id, "picked up scenario");
                    let outcome = run_isolated(Arc::clone(&agent), specs[index].clone()).await;
                    finished.push((index, outcome));
                }
                finished
            });
        }

        let mut slots: Vec<Option<ScenarioOutcome>> = (0..total).map(|_| None).collect();
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(finished) => {
                    for (index, outcome) in finished {
                        slots[index] = Some(outcome);
                    }
                }
                Err(e) => error!(error = %e, "scheduler worker aborted"),
            }
        }

        let mut outcomes = Vec::with_capacity(total);
        for (slot, spec) in slots.into_iter().zip(specs.iter()) {
            let outcome = match slot {
                Some(outcome) => outcome,
                None => {
                    self.report_not_run(spec).await;
                    ScenarioOutcome::NotRun {
                        spec_id: spec.id.clone(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let summary = BatchSummary::from_outcomes(&outcomes);
        info!(
            passed = summary.passed,
            failed = summary.failed,
            human_review = summary.human_review,
            errored = summary.errored,
            not_run = summary.not_run,
            "scenario batch finished"
        );
        Ok(outcomes)
    }

    async fn report_not_run(&self, spec: &ScenarioSpec) {
        let update = StatusUpdate::new(uuid::Uuid::new_v4(), &spec.id, RunStatus::NotRun)
            .with_reasoning("batch cancelled before dispatch");
        if let Err(e) = self.agent.sink().update_status(update).await {
            warn!(scenario_id = %spec.id, error = %e, "failed to report run status");
        }
    }
}

/// Run one scenario on its own task so a panic stays inside this slot.
async fn run_isolated(agent: Arc<ScenarioAgent>, spec: ScenarioSpec) -> ScenarioOutcome {
    // The state outlives the task so a panic still reports under the same run id.
    let shared = Arc::new(Mutex::new(RunState::new(&spec)));
    let task_agent = Arc::clone(&agent);
    let task_state = Arc::clone(&shared);
    let task_spec = spec.clone();
    let handle = tokio::spawn(async move {
        let mut state = task_state.lock().await;
        task_agent.run_with_state(&task_spec, &mut state).await
    });

    let result = handle.await;
    let mut state = shared.lock().await.clone();
    match result {
        Ok(Ok(judgment)) => ScenarioOutcome::Completed(CompletedRun {
            spec_id: spec.id.clone(),
            state,
            judgment,
        }),
        Ok(Err(error)) => ScenarioOutcome::Failed(RunFailure { state, error }),
        Err(join_error) => {
            let message = if join_error.is_panic() {
                panic_message(join_error.into_panic())
            } else {
                join_error.to_string()
            };
            error!(
                scenario_id = %spec.id,
                run_id = %state.run_id,
                turns = state.turn_count,
                %message,
                "scenario run panicked"
            );

            state.phase = RunPhase::Failed;
            let error = EvaluationError::Panicked { message };
            let update = StatusUpdate::new(state.run_id, &spec.id, RunStatus::Failed)
                .with_reasoning(error.to_string());
            if let Err(e) = agent.sink().update_status(update).await {
                warn!(scenario_id = %spec.id, error = %e, "failed to report run status");
            }
            ScenarioOutcome::Failed(RunFailure { state, error })
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
