use crate::config::ProviderConfig;
use crate::provider::{ModelError, ModelProvider, ModelResult};
use crate::retry::{fetch_json, RetryPolicy};
use crate::types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, JsonSchema, ResponseFormat,
    Usage,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// OpenAI chat completion request
#[derive(Debug, Clone, Serialize)]
struct OpenAiChatRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<OpenAiResponseFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: OpenAiJsonSchema,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiJsonSchema {
    name: String,
    strict: bool,
    schema: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChatResponse {
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

/// Chat-completions backend. Also serves any OpenAI-compatible endpoint
/// (vLLM, LiteLLM, Azure-style proxies) through `base_url`.
pub struct OpenAiProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
    retry: RetryPolicy,
}

impl OpenAiProvider {
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

    /// Strict json_schema mode rejects schemas that allow extra keys.
    fn strict_schema(schema: &JsonSchema) -> ModelResult<serde_json::Value> {
        let mut value = serde_json::to_value(schema)?;
        if let Some(object) = value.as_object_mut() {
            object.insert(
                "additionalProperties".to_string(),
                serde_json::Value::Bool(false),
            );
        }
        Ok(value)
    }

    fn convert_response_format(format: &ResponseFormat) -> ModelResult<OpenAiResponseFormat> {
        Ok(OpenAiResponseFormat {
            format_type: "json_schema",
            json_schema: OpenAiJsonSchema {
                name: format.name.clone(),
                strict: true,
                schema: Self::strict_schema(&format.schema)?,
            },
        })
    }

    fn build_request_body(&self, request: &ChatRequest) -> ModelResult<OpenAiChatRequest> {
        let response_format = match &request.response_format {
            Some(format) if self.config.structured_output => {
                Some(Self::convert_response_format(format)?)
            }
            _ => None,
        };

        Ok(OpenAiChatRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|msg| OpenAiMessage {
                    role: msg.role.as_str().to_string(),
                    content: Some(msg.content.clone()),
                })
                .collect(),
            temperature: request.temperature.or(Some(self.config.temperature)),
            max_tokens: request.max_tokens.or(Some(self.config.max_tokens)),
            response_format,
        })
    }

    fn parse_response(response: OpenAiChatResponse) -> ChatResponse {
        let choices = response
            .choices
            .into_iter()
            .map(|choice| Choice {
                message: ChatMessage::assistant(choice.message.content.unwrap_or_default()),
                finish_reason: choice.finish_reason.as_deref().map(FinishReason::from_wire),
            })
            .collect();

        let usage = response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });

        ChatResponse { choices, usage }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        debug!("Starting chat request with model: {}", request.model);

        let body = self.build_request_body(&request)?;
        let url = self.config.endpoint("/v1/chat/completions");

        let response: OpenAiChatResponse = self
            .retry
            .execute("openai.chat", |ctx| {
                fetch_json(
                    self.client
                        .post(&url)
                        .bearer_auth(&self.api_key)
                        .timeout(ctx.remaining().min(self.config.timeout))
                        .json(&body),
                )
            })
            .await?;

        info!(
            provider = "openai",
            choices = response.choices.len(),
            "Chat request completed"
        );
        Ok(Self::parse_response(response))
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_structured_output(&self) -> bool {
        self.config.structured_output
    }
}
