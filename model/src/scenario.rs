//! Per-turn payloads exchanged with the reasoning backend.
//!
//! A [`GenerationRequest`] is rebuilt every turn from the run's current state and
//! the backend answers with a [`NextAction`]. Every field of [`NextAction`] is
//! required; a reply that omits one is rejected rather than defaulted.

use crate::retry::ContractViolation;
use crate::types::{JsonSchema, PropertySchema, ResponseFormat, SchemaType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Version tag sent with every generation request.
pub const PROTOCOL_VERSION: &str = "2.0";

/// One utterance/reply exchange.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Turn {
    pub turn: u32,
    pub user: String,
    pub assistant: String,
}

/// Read-only snapshot of a run, as the backend sees it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationState {
    pub history: Vec<Turn>,
    pub turn_count: u32,
    pub max_turns: u32,
    pub fulfilled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationRequest {
    pub scenario: String,
    pub expected_outcome: String,
    pub current_state: ConversationState,
    pub version: String,
}

impl GenerationRequest {
    pub fn new(
        scenario: impl Into<String>,
        expected_outcome: impl Into<String>,
        current_state: ConversationState,
    ) -> Self {
        Self {
            scenario: scenario.into(),
            expected_outcome: expected_outcome.into(),
            current_state,
            version: PROTOCOL_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub const VALUES: [&'static str; 3] = ["high", "medium", "low"];
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Direct,
    Exploratory,
    Clarification,
    Escalation,
    Alternative,
}

impl Strategy {
    pub const VALUES: [&'static str; 5] = [
        "direct",
        "exploratory",
        "clarification",
        "escalation",
        "alternative",
    ];
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strategy::Direct => "direct",
            Strategy::Exploratory => "exploratory",
            Strategy::Clarification => "clarification",
            Strategy::Escalation => "escalation",
            Strategy::Alternative => "alternative",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SafetyCheck {
    Passed,
    Flagged,
}

impl SafetyCheck {
    pub const VALUES: [&'static str; 2] = ["passed", "flagged"];
}

/// The acting agent's decision for one turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NextAction {
    pub next_message: String,
    pub reasoning: String,
    pub fulfilled: bool,
    pub confidence: Confidence,
    pub strategy: Strategy,
    pub safety_check: SafetyCheck,
    pub error_logs: Vec<String>,
    pub adaptation_notes: String,
}

impl NextAction {
    /// Parse a backend payload, rejecting anything that is not exactly this shape.
    pub fn parse(payload: &str) -> Result<Self, ContractViolation> {
        serde_json::from_str(payload).map_err(ContractViolation::schema)
    }

    pub fn response_format() -> ResponseFormat {
        let mut properties = BTreeMap::new();
        properties.insert(
            "next_message".to_string(),
            PropertySchema::new(
                SchemaType::String,
                "Your next message to send to the assistant under test",
            ),
        );
        properties.insert(
            "reasoning".to_string(),
            PropertySchema::new(
                SchemaType::String,
                "Brief explanation of your strategy for this turn",
            ),
        );
        properties.insert(
            "fulfilled".to_string(),
            PropertySchema::new(
                SchemaType::Boolean,
                "Whether the scenario goal has been achieved",
            ),
        );
        properties.insert(
            "confidence".to_string(),
            PropertySchema::string_enum(
                "Level of confidence in the current progress",
                &Confidence::VALUES,
            ),
        );
        properties.insert(
            "strategy".to_string(),
            PropertySchema::string_enum(
                "The approach being used for this turn",
                &Strategy::VALUES,
            ),
        );
        properties.insert(
            "safety_check".to_string(),
            PropertySchema::string_enum(
                "Result of the safety check for this turn",
                &SafetyCheck::VALUES,
            ),
        );
        properties.insert(
            "error_logs".to_string(),
            PropertySchema::array_of(
                SchemaType::String,
                "Unexpected behaviors or responses worth logging",
            ),
        );
        properties.insert(
            "adaptation_notes".to_string(),
            PropertySchema::new(
                SchemaType::String,
                "How you are adapting to the assistant's patterns",
            ),
        );

        ResponseFormat {
            name: "next_action".to_string(),
            schema: JsonSchema {
                schema_type: SchemaType::Object,
                required: properties.keys().cloned().collect(),
                properties,
            },
        }
    }
}
