use crate::config::ProviderConfig;
use crate::provider::{ModelError, ModelProvider, ModelResult};
use crate::retry::{fetch_json, RetryPolicy};
use crate::types::{ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, JsonSchema, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Serialize)]
struct OllamaApiRequest {
    model: String,
    messages: Vec<OllamaApiMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<JsonSchema>,
    options: OllamaApiOptions,
}

#[derive(Serialize, Deserialize)]
struct OllamaApiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OllamaApiOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaApiResponse {
    message: OllamaApiMessage,
    #[serde(default)]
    done_reason: Option<String>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

/// Local Ollama server over its native `/api/chat` endpoint. No key needed.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    config: ProviderConfig,
    retry: RetryPolicy,
}

impl OllamaProvider {
    pub fn new(config: ProviderConfig) -> ModelResult<Self> {
        config.validate().map_err(ModelError::invalid_config)?;

        // Accept the OpenAI-compatible address too
        let trimmed = config.base_url.trim_end_matches('/');
        let base_url = trimmed.strip_suffix("/v1").unwrap_or(trimmed).to_string();

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| {
                ModelError::invalid_config(format!("Failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        })
    }

    fn build_request_body(&self, request: &ChatRequest) -> OllamaApiRequest {
        OllamaApiRequest {
            model: request.model.clone(),
            messages: request
                .messages
                .iter()
                .map(|msg| OllamaApiMessage {
                    role: msg.role.as_str().to_string(),
                    content: msg.content.clone(),
                })
                .collect(),
            stream: false,
            format: request
                .response_format
                .as_ref()
                .filter(|_| self.config.structured_output)
                .map(|format| format.schema.clone()),
            options: OllamaApiOptions {
                temperature: request.temperature.unwrap_or(self.config.temperature),
                num_predict: request.max_tokens.unwrap_or(self.config.max_tokens),
            },
        }
    }

    fn parse_response(response: OllamaApiResponse) -> ChatResponse {
        let usage = match (response.prompt_eval_count, response.eval_count) {
            (Some(prompt), Some(completion)) => Some(Usage {
                prompt_tokens: prompt,
                completion_tokens: completion,
                total_tokens: prompt + completion,
            }),
            _ => None,
        };

        ChatResponse {
            choices: vec![Choice {
                message: ChatMessage::assistant(response.message.content),
                finish_reason: Some(
                    response
                        .done_reason
                        .as_deref()
                        .map(FinishReason::from_wire)
                        .unwrap_or(FinishReason::Stop),
                ),
            }],
            usage,
        }
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse> {
        debug!("Starting chat request with model: {}", request.model);

        let body = self.build_request_body(&request);
        let url = format!("{}/api/chat", self.base_url);

        let response: OllamaApiResponse = self
            .retry
            .execute("ollama.chat", |ctx| {
                fetch_json(
                    self.client
                        .post(&url)
                        .timeout(ctx.remaining().min(self.config.timeout))
                        .json(&body),
                )
            })
            .await?;

        info!(provider = "ollama", "Chat request completed");
        Ok(Self::parse_response(response))
    }

    fn provider_name(&self) -> &'static str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn supports_structured_output(&self) -> bool {
        self.config.structured_output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use crate::judge::Judgment;
    use crate::retry::{CallError, RetryConfig};
    use std::time::Duration;

    fn test_config(base_url: &str) -> ProviderConfig {
        ProviderConfig::new(ProviderKind::Ollama)
            .with_base_url(base_url)
            .with_retry(RetryConfig::default().with_base_delay(Duration::from_millis(10)))
    }

    #[test]
    fn test_provider_creation_url_normalization() {
        let provider = OllamaProvider::new(test_config("http://localhost:11434/v1")).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");

        let provider = OllamaProvider::new(test_config("http://localhost:11434/")).unwrap();
        assert_eq!(provider.base_url, "http://localhost:11434");
        assert_eq!(provider.provider_name(), "ollama");
    }

    #[test]
    fn test_build_chat_request_body() {
        let provider = OllamaProvider::new(test_config("http://localhost:11434")).unwrap();
        let request = ChatRequest::new(
            "qwen3:0.6b",
            vec![ChatMessage::system("You judge"), ChatMessage::user("{}")],
        )
        .with_temperature(0.0)
        .with_response_format(Judgment::response_format());

        let body = serde_json::to_value(provider.build_request_body(&request)).unwrap();
        assert_eq!(body["model"], "qwen3:0.6b");
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["format"]["type"], "object");
        assert_eq!(body["options"]["temperature"], 0.0);
        assert_eq!(body["options"]["num_predict"], 1024);
    }

    #[test]
    fn test_build_request_body_without_structured_output() {
        let provider = OllamaProvider::new(
            test_config("http://localhost:11434").with_structured_output(false),
        )
        .unwrap();
        let request = ChatRequest::new("qwen3:0.6b", vec![ChatMessage::user("hi")])
            .with_response_format(Judgment::response_format());
        let body = serde_json::to_value(provider.build_request_body(&request)).unwrap();
        assert!(body.get("format").is_none());
    }

    #[test]
    fn test_parse_response_usage() {
        let wire: OllamaApiResponse = serde_json::from_value(serde_json::json!({
            "message": {"role": "assistant", "content": "{}"},
            "done": true,
            "done_reason": "length",
            "prompt_eval_count": 3,
            "eval_count": 4
        }))
        .unwrap();
        let response = OllamaProvider::parse_response(wire);
        assert_eq!(response.usage.unwrap().total_tokens, 7);
        assert_eq!(response.choices[0].finish_reason, Some(FinishReason::Length));
    }

    #[tokio::test]
    async fn test_chat_retries_server_error_then_succeeds() {
        let mut server = mockito::Server::new_async().await;
        let failing = server
            .mock("POST", "/api/chat")
            .with_status(500)
            .with_body("Internal Server Error")
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body(r#"{"message":{"role":"assistant","content":"{}"},"done":true}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = OllamaProvider::new(test_config(&server.url())).unwrap();
        let request = ChatRequest::new("test-model", vec![ChatMessage::user("hi")]);
        let response = provider.chat(request).await.unwrap();
        assert_eq!(response.first_content(), Some("{}"));

        failing.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_returns_error_on_not_found() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(404)
            .with_body(r#"{"error":"model 'test-model' not found"}"#)
            .expect(1)
            .create_async()
            .await;

        let provider = OllamaProvider::new(test_config(&server.url())).unwrap();
        let request = ChatRequest::new("test-model", vec![ChatMessage::user("hi")]);
        let result = provider.chat(request).await;
        assert!(matches!(
            result,
            Err(ModelError::Call(CallError::Status { status: 404, .. }))
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_returns_error_on_invalid_json() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/chat")
            .with_status(200)
            .with_body("not valid json")
            .expect(1)
            .create_async()
            .await;

        let provider = OllamaProvider::new(test_config(&server.url())).unwrap();
        let request = ChatRequest::new("test-model", vec![ChatMessage::user("hi")]);
        let result = provider.chat(request).await;
        assert!(result.unwrap_err().contract_violation().is_some());
        mock.assert_async().await;
    }
}
