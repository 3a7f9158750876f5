pub mod cohere;
pub mod config;
pub mod gemini;
pub mod generation;
pub mod judge;
#[cfg(feature = "ollama")]
pub mod ollama;
pub mod openai;
pub mod provider;
pub mod retry;
pub mod scenario;
pub mod types;

use std::sync::Arc;

pub use cohere::CohereProvider;
pub use config::{ProviderConfig, ProviderKind};
pub use gemini::GeminiProvider;
pub use generation::StructuredGenerator;
pub use judge::{JudgeInput, Judgment, Verdict};
pub use openai::OpenAiProvider;
pub use provider::{ModelError, ModelProvider, ModelResult};
pub use retry::{CallContext, CallError, CallResult, ContractViolation, RetryConfig, RetryPolicy};
pub use scenario::{
    Confidence, ConversationState, GenerationRequest, NextAction, SafetyCheck, Strategy, Turn,
    PROTOCOL_VERSION,
};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, Choice, FinishReason, JsonSchema, MessageRole,
    PropertySchema, ResponseFormat, SchemaType, Usage,
};

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

/// Build the generator for the configured backend.
///
/// This is the only place that looks at [`ProviderKind`]; everything
/// downstream works against [`StructuredGenerator`].
pub fn provider_from_config(config: ProviderConfig) -> ModelResult<Arc<dyn StructuredGenerator>> {
    tracing::debug!(provider = %config.kind, model = %config.model, "building reasoning backend");
    let generator: Arc<dyn StructuredGenerator> = match config.kind {
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::new(config)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(config)?),
        ProviderKind::Cohere => Arc::new(CohereProvider::new(config)?),
        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => Arc::new(OllamaProvider::new(config)?),
        #[cfg(not(feature = "ollama"))]
        ProviderKind::Ollama => {
            return Err(ModelError::invalid_config(
                "ollama backend is not compiled in (enable the `ollama` feature)",
            ))
        }
    };
    Ok(generator)
}

pub mod prelude {
    pub use crate::config::*;
    pub use crate::generation::*;
    pub use crate::judge::*;
    pub use crate::provider::*;
    pub use crate::retry::*;
    pub use crate::scenario::*;
    pub use crate::types::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_config_selects_backend() {
        let openai =
            provider_from_config(ProviderConfig::new(ProviderKind::OpenAi).with_api_key("k"))
                .unwrap();
        assert_eq!(openai.backend_name(), "openai");

        let cohere =
            provider_from_config(ProviderConfig::new(ProviderKind::Cohere).with_api_key("k"))
                .unwrap();
        assert_eq!(cohere.backend_name(), "cohere");

        let gemini =
            provider_from_config(ProviderConfig::new(ProviderKind::Gemini).with_api_key("k"))
                .unwrap();
        assert_eq!(gemini.backend_name(), "gemini");
    }

    #[cfg(feature = "ollama")]
    #[test]
    fn test_provider_from_config_ollama_needs_no_key() {
        let ollama = provider_from_config(ProviderConfig::new(ProviderKind::Ollama)).unwrap();
        assert_eq!(ollama.backend_name(), "ollama");
    }

    #[test]
    fn test_provider_from_config_rejects_missing_key() {
        let result = provider_from_config(ProviderConfig::new(ProviderKind::OpenAi));
        assert!(matches!(result, Err(ModelError::InvalidConfig { .. })));
    }
}
