pub mod agent;
pub mod config;
pub mod respondent;
pub mod scenarios;
pub mod scheduler;
pub mod sink;

pub use agent::prompts::{ACTOR_INSTRUCTION, JUDGE_INSTRUCTION};
pub use agent::{
    AgentConfig, CompletedRun, EvaluationError, RunFailure, RunPhase, RunState, ScenarioAgent,
};
pub use config::{AppConfig, ConfigError, ConfigOverrides, RespondentConfig, SchedulerConfig};
pub use respondent::{
    HttpRespondent, RespondentError, RespondentReply, RespondentResult, RespondentTransport,
    SessionToken, NO_RESPONSE_TEXT,
};
pub use scenarios::{load_scenarios, ScenarioEntry, ScenarioError, ScenarioSpec};
pub use scheduler::{
    BatchSummary, OutcomeReport, ScenarioOutcome, Scheduler, SchedulerError, SchedulerResult,
};
pub use sink::{LogSink, MemorySink, ResultSink, RunStatus, SinkError, StatusUpdate, TurnRecord};
