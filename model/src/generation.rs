//! Structured generation over any [`ModelProvider`].
//!
//! The orchestration layer only sees [`StructuredGenerator`]; every provider
//! gets it through the blanket implementation below, so the request layout
//! (instruction as the system message, JSON payload as the user message,
//! temperature zero, schema constraint) is identical across backends.

use crate::judge::{JudgeInput, Judgment};
use crate::provider::{ModelProvider, ModelResult};
use crate::retry::ContractViolation;
use crate::scenario::{GenerationRequest, NextAction, Turn};
use crate::types::{ChatMessage, ChatRequest, ResponseFormat};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

#[async_trait]
pub trait StructuredGenerator: Send + Sync {
    /// Ask the backend for the acting agent's next move.
    async fn generate_next_action(
        &self,
        instruction: &str,
        request: &GenerationRequest,
    ) -> ModelResult<NextAction>;

    /// Ask the backend for the final verdict on a finished conversation.
    async fn generate_judgment(
        &self,
        instruction: &str,
        conversation: &[Turn],
        scenario: &str,
    ) -> ModelResult<Judgment>;

    fn backend_name(&self) -> &str;
}

#[async_trait]
impl<P> StructuredGenerator for P
where
    P: ModelProvider + ?Sized,
{
    async fn generate_next_action(
        &self,
        instruction: &str,
        request: &GenerationRequest,
    ) -> ModelResult<NextAction> {
        let content = structured_call(
            self,
            instruction,
            request,
            NextAction::response_format(),
        )
        .await?;
        Ok(NextAction::parse(&content)?)
    }

    async fn generate_judgment(
        &self,
        instruction: &str,
        conversation: &[Turn],
        scenario: &str,
    ) -> ModelResult<Judgment> {
        let input = JudgeInput {
            scenario: scenario.to_string(),
            conversation: conversation.to_vec(),
        };
        let content =
            structured_call(self, instruction, &input, Judgment::response_format()).await?;
        Ok(Judgment::parse(&content)?)
    }

    fn backend_name(&self) -> &str {
        self.provider_name()
    }
}

/// Send one schema-constrained request and return the raw reply text.
async fn structured_call<P, T>(
    provider: &P,
    instruction: &str,
    payload: &T,
    format: ResponseFormat,
) -> ModelResult<String>
where
    P: ModelProvider + ?Sized,
    T: Serialize + Sync,
{
    let user_payload = serde_json::to_string(payload)?;

    let mut request = ChatRequest::new(provider.model(), Vec::new()).with_temperature(0.0);
    let system = if provider.supports_structured_output() {
        request = request.with_response_format(format);
        instruction.to_string()
    } else {
        format!("{}\n\n{}", instruction, describe_schema(&format))
    };
    request.messages = vec![ChatMessage::system(system), ChatMessage::user(user_payload)];

    debug!(
        provider = provider.provider_name(),
        model = provider.model(),
        schema = %request
            .response_format
            .as_ref()
            .map(|f| f.name.as_str())
            .unwrap_or("inline"),
        "sending structured generation request"
    );

    let response = provider.chat(request).await?;
    let content = response
        .first_content()
        .ok_or(ContractViolation::NoCandidates)?;

    if content.trim().is_empty() {
        return Err(ContractViolation::EmptyPayload {
            context: format!("{} returned blank content", provider.provider_name()),
        }
        .into());
    }

    Ok(content.to_string())
}

/// Plain-text rendering of a response schema, for backends that cannot be
/// constrained natively.
pub fn describe_schema(format: &ResponseFormat) -> String {
    let mut lines = vec![format!(
        "Respond with a single JSON object ({}) and nothing else. Every field is required:",
        format.name
    )];
    for (name, property) in &format.schema.properties {
        let mut line = format!("- \"{}\" ({}", name, property.schema_type.as_str());
        if let Some(items) = &property.items {
            line.push_str(&format!(" of {}", items.schema_type.as_str()));
        }
        if let Some(values) = &property.enum_values {
            line.push_str(&format!(", one of: {}", values.join(", ")));
        }
        line.push(')');
        if let Some(description) = &property.description {
            line.push_str(&format!(": {}", description));
        }
        lines.push(line);
    }
    lines.join("\n")
}
