use crate::config::ProviderConfig;
use crate::provider::{ModelError, ModelProvider, ModelResult};
use crate::retry::{fetch_json, ContractViolation, RetryPolicy};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, JsonSchema, MessageRole,
    PropertySchema, Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize)]
struct GeminiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<GeminiSchema>,
}

/// Gemini's OpenAPI-subset schema: upper-case type names, no extra keywords.
#[derive(Debug, Clone, Serialize, PartialEq)]
struct GeminiSchema {
    #[serde(rename = "type")]
    schema_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(rename = "enum", skip_serializing_if = "Option::is_none")]
    enum_values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    items: Option<Box<GeminiSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    properties: Option<BTreeMap<String, GeminiSchema>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

pub struct GeminiProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
    retry: RetryPolicy,
}

impl GeminiProvider {
    pub fn new(config: ProviderConfig) -> ModelResult<Self> {
        config.validate().map_err(ModelError::invalid_config)?;
        let api_key = config.require_api_key()?.to_string();

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ModelError::invalid_config(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
            api_key,
        })
    }

    fn convert_property(property: &PropertySchema) -> GeminiSchema {
        GeminiSchema {
            schema_type: property.schema_type.as_str().to_ascii_uppercase(),
            description: property.description.clone(),
            enum_values: property.enum_values.clone(),
            items: property
                .items
                .as_deref()
                .map(|items| Box::new(Self::convert_property(items))),
            properties: None,
            required: None,
        }
    }

    fn convert_schema(schema: &JsonSchema) -> GeminiSchema {
        GeminiSchema {
            schema_type: schema.schema_type.as_str().to_ascii_uppercase(),
            description: None,
            enum_values: None,
            items: None,
            properties: Some(
                schema
                    .properties
                    .iter()
                    .map(|(name, property)| (name.clone(), Self::convert_property(property)))
                    .collect(),
            ),
            required: Some(schema.required.clone()),
        }
    }

    fn text_content(role: &str, text: &str) -> GeminiContent {
        GeminiContent {
            role: Some(role.to_string()),
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
        }
    }

    fn build_request_body(&self, request: &ChatRequest) -> GeminiRequest {
        let system_instruction = request.system_instruction().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart {
                text: Some(text.to_string()),
            }],
        });

        let contents = request
            .conversation()
            .map(|msg| {
                let role = match msg.role {
                    MessageRole::Assistant => "model",
                    _ => "user",
                };
                Self::text_content(role, &msg.content)
            })
            .collect();

        let response_schema = request
            .response_format
            .as_ref()
            .filter(|_| self.config.structured_output)
            .map(|format| Self::convert_schema(&format.schema));

        GeminiRequest {
            system_instruction,
            contents,
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature.unwrap_or(self.config.temperature),
                max_output_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
                response_mime_type: response_schema.as_ref().map(|_| "application/json"),
                response_schema,
            },
        }
    }

    /// Only the first candidate's first part is used.
    fn parse_response(response: GeminiResponse) -> Result<ChatResponse, ContractViolation> {
        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or(ContractViolation::NoCandidates)?;

        let text = candidate
            .content
            .and_then(|content| content.parts.into_iter().next())
            .and_then(|part| part.text)
            .filter(|text| !text.is_empty())
            .ok_or_else(|| ContractViolation::EmptyPayload {
                context: "gemini candidate has no text part".to_string(),
            })?;

        let usage = response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        });

        Ok(ChatResponse {
            choices: vec![Choice {
                message: ChatMessage::assistant(text),
                finish_reason: candidate.finish_reason.as_deref().map(FinishReason::from_wire),
            }],
            usage,
        })
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        debug!("Starting chat request with model: {}", request.model);

        let body = self.build_request_body(&request);
        let url = self
            .config
            .endpoint(&format!("/v1beta/models/{}:generateContent", request.model));

        let response: GeminiResponse = self
            .retry
            .execute("gemini.generate_content", |ctx| {
                fetch_json(
                    self.client
                        .post(&url)
                        .header("x-goog-api-key", &self.api_key)
                        .timeout(ctx.remaining().min(self.config.timeout))
                        .json(&body),
                )
            })
            .await?;

        let response = Self::parse_response(response)?;
        info!(provider = "gemini", "Chat request completed");
        Ok(response)
    }

    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_structured_output(&self) -> bool {
        self.config.structured_output
    }
}
