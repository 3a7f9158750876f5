//! Write-only destination for turn records and run status.
//!
//! The runner never reads back from a sink. Persistence proper belongs to
//! whatever implements [`ResultSink`]; the two implementations here keep
//! records in memory or emit them as tracing events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use model::Verdict;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    NotRun,
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::NotRun => "not_run",
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One delivered exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TurnRecord {
    pub run_id: Uuid,
    pub scenario_id: String,
    pub turn_index: u32,
    pub outgoing_text: String,
    pub incoming_text: String,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusUpdate {
    pub run_id: Uuid,
    pub scenario_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusUpdate {
    pub fn new(run_id: Uuid, scenario_id: impl Into<String>, status: RunStatus) -> Self {
        Self {
            run_id,
            scenario_id: scenario_id.into(),
            status,
            verdict: None,
            reasoning: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_verdict(mut self, verdict: Verdict) -> Self {
        self.verdict = Some(verdict);
        self
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = Some(reasoning.into());
        self
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

pub type SinkResult<T> = Result<T, SinkError>;

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn record_turn(&self, record: TurnRecord) -> SinkResult<()>;

    async fn update_status(&self, update: StatusUpdate) -> SinkResult<()>;
}

/// Keeps everything it receives, in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    turns: RwLock<Vec<TurnRecord>>,
    statuses: RwLock<Vec<StatusUpdate>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn turns(&self) -> Vec<TurnRecord> {
        self.turns.read().await.clone()
    }

    pub async fn statuses(&self) -> Vec<StatusUpdate> {
        self.statuses.read().await.clone()
    }

    pub async fn turns_for(&self, scenario_id: &str) -> Vec<TurnRecord> {
        self.turns
            .read()
            .await
            .iter()
            .filter(|record| record.scenario_id == scenario_id)
            .cloned()
            .collect()
    }

    /// Most recent status reported for a scenario.
    pub async fn latest_status(&self, scenario_id: &str) -> Option<StatusUpdate> {
        self.statuses
            .read()
            .await
            .iter()
            .rev()
            .find(|update| update.scenario_id == scenario_id)
            .cloned()
    }
}

#[async_trait]
impl ResultSink for MemorySink {
    async fn record_turn(&self, record: TurnRecord) -> SinkResult<()> {
        self.turns.write().await.push(record);
        Ok(())
    }

    async fn update_status(&self, update: StatusUpdate) -> SinkResult<()> {
        self.statuses.write().await.push(update);
        Ok(())
    }
}

/// Emits each record as a structured `info` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl ResultSink for LogSink {
    async fn record_turn(&self, record: TurnRecord) -> SinkResult<()> {
        info!(
            run_id = %record.run_id,
            scenario_id = %record.scenario_id,
            turn = record.turn_index,
            outgoing = %record.outgoing_text,
            incoming = %record.incoming_text,
            "turn recorded"
        );
        Ok(())
    }

    async fn update_status(&self, update: StatusUpdate) -> SinkResult<()> {
        info!(
            run_id = %update.run_id,
            scenario_id = %update.scenario_id,
            status = %update.status,
            verdict = update.verdict.map(|v| v.as_str()),
            reasoning = update.reasoning.as_deref(),
            "run status"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(scenario_id: &str, turn_index: u32) -> TurnRecord {
        TurnRecord {
            run_id: Uuid::new_v4(),
            scenario_id: scenario_id.to_string(),
            turn_index,
            outgoing_text: "hello".to_string(),
            incoming_text: "hi there".to_string(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_wire_names() {
        let update = StatusUpdate::new(Uuid::nil(), "s1", RunStatus::NotRun);
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["status"], "not_run");
        assert!(json.get("verdict").is_none());

        let update = StatusUpdate::new(Uuid::nil(), "s1", RunStatus::Completed)
            .with_verdict(Verdict::HumanReview)
            .with_reasoning("ambiguous");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["verdict"], "human_review");
        assert_eq!(json["reasoning"], "ambiguous");
    }

    #[tokio::test]
    async fn test_memory_sink_filters_by_scenario() {
        let sink = MemorySink::new();
        sink.record_turn(record("a", 1)).await.unwrap();
        sink.record_turn(record("b", 1)).await.unwrap();
        sink.record_turn(record("a", 2)).await.unwrap();

        let turns = sink.turns_for("a").await;
        assert_eq!(
            turns.iter().map(|t| t.turn_index).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert_eq!(sink.turns().await.len(), 3);
    }

    #[tokio::test]
    async fn test_latest_status_wins() {
        let sink = MemorySink::new();
        let run_id = Uuid::new_v4();
        sink.update_status(StatusUpdate::new(run_id, "a", RunStatus::Running))
            .await
            .unwrap();
        sink.update_status(StatusUpdate::new(run_id, "a", RunStatus::Failed).with_reasoning("boom"))
            .await
            .unwrap();

        let latest = sink.latest_status("a").await.unwrap();
        assert_eq!(latest.status, RunStatus::Failed);
        assert_eq!(latest.reasoning.as_deref(), Some("boom"));
        assert!(sink.latest_status("missing").await.is_none());
    }

    #[tokio::test]
    async fn test_log_sink_accepts_everything() {
        let sink = LogSink;
        assert!(sink.record_turn(record("a", 1)).await.is_ok());
        assert!(sink
            .update_status(StatusUpdate::new(Uuid::nil(), "a", RunStatus::Completed))
            .await
            .is_ok());
    }

    #[test]
    fn test_sink_error_names_the_cause() {
        let err = SinkError::Unavailable("connection refused".to_string());
        assert_eq!(err.to_string(), "sink unavailable: connection refused");
    }
}
