//! Post-run judgment of a scenario conversation
//!
//! After the turn loop ends, the reasoning backend is asked once for a
//! [`Judgment`]: a tri-state verdict, a confidence label, a short evidence
//! summary and two scores in `[0, 1]`. The verdict is the authoritative
//! outcome of a run; the in-loop `fulfilled` flag only ends the loop.
//!
//! # Examples
//!
//! ```rust
//! use model::judge::{Judgment, Verdict};
//!
//! let payload = r#"{
//!     "judgment": "pass",
//!     "confidence": "high",
//!     "evidence_summary": "The assistant confirmed the booking with a reference number.",
//!     "scenario_completion_score": 0.95,
//!     "conversation_quality_score": 0.8
//! }"#;
//!
//! let judgment = Judgment::parse(payload).unwrap();
//! assert_eq!(judgment.judgment, Verdict::Pass);
//! ```

use crate::retry::ContractViolation;
use crate::scenario::{Confidence, Turn};
use crate::types::{JsonSchema, PropertySchema, ResponseFormat, SchemaType};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Final verdict on a scenario
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// The expected outcome was demonstrably reached
    Pass,
    /// The expected outcome was not reached
    Fail,
    /// The conversation is ambiguous and needs a person to look at it
    HumanReview,
}

impl Verdict {
    pub const VALUES: [&'static str; 3] = ["pass", "fail", "human_review"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::HumanReview => "human_review",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input handed to the judge: the scenario and the full conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JudgeInput {
    pub scenario: String,
    pub conversation: Vec<Turn>,
}

/// Structured verdict for one completed run
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Judgment {
    /// Verdict label
    pub judgment: Verdict,
    /// Judge's confidence in the verdict
    pub confidence: Confidence,
    /// Evidence from the conversation supporting the verdict
    pub evidence_summary: String,
    /// How much of the scenario was completed (0.0 to 1.0)
    pub scenario_completion_score: f64,
    /// Overall quality of the assistant's side of the conversation (0.0 to 1.0)
    pub conversation_quality_score: f64,
    /// Optional per-dimension breakdown, kept as the backend sent it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_breakdown: Option<serde_json::Value>,
    /// Optional flags raised by the judge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<Vec<String>>,
    /// Optional recommendations for the assistant's owners
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<String>>,
}

impl fmt::Display for Judgment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} confidence, completion: {:.2}, quality: {:.2})",
            self.judgment,
            self.confidence,
            self.scenario_completion_score,
            self.conversation_quality_score
        )
    }
}

impl Judgment {
    /// Parse and validate a backend payload.
    pub fn parse(payload: &str) -> Result<Self, ContractViolation> {
        let judgment: Judgment =
            serde_json::from_str(payload).map_err(ContractViolation::schema)?;
        judgment.validate()?;
        Ok(judgment)
    }

    /// Check that both scores lie in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ContractViolation> {
        for (field, value) in [
            ("scenario_completion_score", self.scenario_completion_score),
            ("conversation_quality_score", self.conversation_quality_score),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ContractViolation::OutOfRange {
                    field: field.to_string(),
                    value,
                });
            }
        }
        Ok(())
    }

    pub fn is_pass(&self) -> bool {
        self.judgment == Verdict::Pass
    }

    pub fn response_format() -> ResponseFormat {
        let mut properties = BTreeMap::new();
        properties.insert(
            "judgment".to_string(),
            PropertySchema::string_enum(
                "Final verdict on whether the scenario was completed as intended",
                &Verdict::VALUES,
            ),
        );
        properties.insert(
            "confidence".to_string(),
            PropertySchema::string_enum("Level of confidence in the judgment", &Confidence::VALUES),
        );
        properties.insert(
            "evidence_summary".to_string(),
            PropertySchema::new(
                SchemaType::String,
                "Concise summary of evidence from the conversation that led to the verdict",
            ),
        );
        properties.insert(
            "scenario_completion_score".to_string(),
            PropertySchema::new(SchemaType::Number, "Score 0-1 for scenario completion"),
        );
        properties.insert(
            "conversation_quality_score".to_string(),
            PropertySchema::new(
                SchemaType::Number,
                "Score 0-1 for overall conversation quality",
            ),
        );

        ResponseFormat {
            name: "judgment".to_string(),
            schema: JsonSchema {
                schema_type: SchemaType::Object,
                required: properties.keys().cloned().collect(),
                properties,
            },
        }
    }
}
