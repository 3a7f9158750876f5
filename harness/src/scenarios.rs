//! Scenario definitions and scenario files.
//!
//! A scenario file is either TOML with one `[[scenarios]]` table per entry or
//! a JSON array of the same objects:
//!
//! ```toml
//! [[scenarios]]
//! id = "bill-payment"
//! scenario = "Pay the outstanding balance on account 12345"
//! expected_outcome = "The assistant confirms the payment"
//! max_turns = 8
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScenarioError {
    #[error("failed to read scenario file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scenario file {path}: {message}")]
    Parse { path: String, message: String },

    #[error("invalid scenario {id}: {message}")]
    Invalid { id: String, message: String },
}

pub type ScenarioResult<T> = Result<T, ScenarioError>;

/// Everything one run needs to know about what it is testing. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScenarioSpec {
    pub id: String,
    pub scenario: String,
    pub expected_outcome: String,
    pub turn_budget: u32,
    pub project_id: String,
}

impl ScenarioSpec {
    pub fn new(
        id: impl Into<String>,
        scenario: impl Into<String>,
        expected_outcome: impl Into<String>,
        turn_budget: u32,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            scenario: scenario.into(),
            expected_outcome: expected_outcome.into(),
            turn_budget,
            project_id: project_id.into(),
        }
    }

    pub fn validate(&self) -> ScenarioResult<()> {
        let invalid = |message: &str| ScenarioError::Invalid {
            id: self.id.clone(),
            message: message.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.scenario.trim().is_empty() {
            return Err(invalid("scenario text must not be empty"));
        }
        if self.turn_budget == 0 {
            return Err(invalid("turn budget must be at least 1"));
        }
        if self.project_id.trim().is_empty() {
            return Err(invalid("project id must not be empty"));
        }
        Ok(())
    }
}

/// One entry as written in a scenario file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScenarioEntry {
    pub id: String,
    pub scenario: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default)]
    pub max_turns: Option<u32>,
}

impl ScenarioEntry {
    pub fn into_spec(self, project_id: &str, default_turn_budget: u32) -> ScenarioSpec {
        ScenarioSpec {
            id: self.id,
            scenario: self.scenario,
            expected_outcome: self.expected_outcome,
            turn_budget: self.max_turns.unwrap_or(default_turn_budget),
            project_id: project_id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    scenarios: Vec<ScenarioEntry>,
}

/// Parse scenario entries from text. `json` selects the JSON array format.
pub fn parse_entries(content: &str, json: bool, origin: &str) -> ScenarioResult<Vec<ScenarioEntry>> {
    let parse_error = |message: String| ScenarioError::Parse {
        path: origin.to_string(),
        message,
    };

    if json {
        serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))
    } else {
        toml::from_str::<ScenarioFile>(content)
            .map(|file| file.scenarios)
            .map_err(|e| parse_error(e.to_string()))
    }
}

/// Load, resolve and validate every scenario in a file.
pub fn load_scenarios(
    path: &Path,
    project_id: &str,
    default_turn_budget: u32,
) -> ScenarioResult<Vec<ScenarioSpec>> {
    let origin = path.display().to_string();
    let content = std::fs::read_to_string(path).map_err(|source| ScenarioError::Io {
        path: origin.clone(),
        source,
    })?;

    let json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let specs: Vec<ScenarioSpec> = parse_entries(&content, json, &origin)?
        .into_iter()
        .map(|entry| entry.into_spec(project_id, default_turn_budget))
        .collect();

    for spec in &specs {
        spec.validate()?;
    }

    let mut seen = std::collections::HashSet::new();
    for spec in &specs {
        if !seen.insert(spec.id.as_str()) {
            return Err(ScenarioError::Invalid {
                id: spec.id.clone(),
                message: "duplicate scenario id".to_string(),
            });
        }
    }

    tracing::debug!(path = %origin, count = specs.len(), "loaded scenarios");
    Ok(specs)
}
