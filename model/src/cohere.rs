use crate::config::ProviderConfig;
use crate::provider::{ModelError, ModelProvider, ModelResult};
use crate::retry::{fetch_json, ContractViolation, RetryPolicy};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, JsonSchema, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Cohere v2 chat request
#[derive(Debug, Clone, Serialize)]
struct CohereChatRequest {
    model: String,
    messages: Vec<CohereMessage>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<CohereResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct CohereMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct CohereResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchema,
}

#[derive(Debug, Clone, Deserialize)]
struct CohereChatResponse {
    message: CohereResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
    #[serde(default)]
    usage: Option<CohereUsage>,
}

#[derive(Debug, Clone, Deserialize)]
struct CohereResponseMessage {
    #[serde(default)]
    content: Vec<CohereContentItem>,
}

#[derive(Debug, Clone, Deserialize)]
struct CohereContentItem {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CohereUsage {
    #[serde(default)]
    tokens: Option<CohereTokens>,
}

#[derive(Debug, Clone, Deserialize)]
struct CohereTokens {
    #[serde(default)]
    input_tokens: f64,
    #[serde(default)]
    output_tokens: f64,
}

pub struct CohereProvider {
    client: reqwest::Client,
    config: ProviderConfig,
    api_key: String,
    retry: RetryPolicy,
}

impl CohereProvider {
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

    fn build_request_body(&self, request: &ChatRequest) -> CohereChatRequest {
        let response_format = request
            .response_format
            .as_ref()
            .filter(|_| self.config.structured_output)
            .map(|format| CohereResponseFormat {
                format_type: "json_object",
                json_schema: format.schema.clone(),
            });

        CohereChatRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|msg| CohereMessage {
                    role: msg.role.as_str(),
                    content: msg.content.clone(),
                })
                .collect(),
            temperature: request.temperature.unwrap_or(self.config.temperature),
            max_tokens: request.max_tokens.unwrap_or(self.config.max_tokens),
            response_format,
        }
    }

    fn parse_response(response: CohereChatResponse) -> Result<ChatResponse, ContractViolation> {
        let text = response
            .message
            .content
            .into_iter()
            .next()
            .and_then(|item| item.text)
            .ok_or_else(|| ContractViolation::EmptyPayload {
                context: "cohere reply has no content".to_string(),
            })?;

        let usage = response.usage.and_then(|u| u.tokens).map(|t| {
            let prompt_tokens = t.input_tokens as u32;
            let completion_tokens = t.output_tokens as u32;
            Usage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
            }
        });

        Ok(ChatResponse {
            choices: vec![Choice {
                message: ChatMessage::assistant(text),
                finish_reason: response.finish_reason.as_deref().map(FinishReason::from_wire),
            }],
            usage,
        })
    }
}

#[async_trait]
impl ModelProvider for CohereProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        debug!("Starting chat request with model: {}", request.model);

        let body = self.build_request_body(&request);
        let url = self.config.endpoint("/v2/chat");

        let response: CohereChatResponse = self
            .retry
            .execute("cohere.chat", |ctx| {
                fetch_json(
                    self.client
                        .post(&url)
                        .bearer_auth(&self.api_key)
                        .timeout(ctx.remaining().min(self.config.timeout))
                        .json(&body),
                )
            })
            .await?;

        let response = Self::parse_response(response)?;
        info!(provider = "cohere", "Chat request completed");
        Ok(response)
    }

    fn provider_name(&self) -> &'static str {
        "cohere"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_structured_output(&self) -> bool {
        self.config.structured_output
    }
}
