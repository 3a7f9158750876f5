use crate::retry::{CallError, ContractViolation};
use crate::types::{ChatRequest, ChatResponse};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error(transparent)]
    Call(#[from] CallError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// The contract violation behind this error, if the backend answered with
    /// an unusable payload.
    pub fn contract_violation(&self) -> Option<&ContractViolation> {
        match self {
            ModelError::Call(CallError::Contract(violation)) => Some(violation),
            _ => None,
        }
    }
}

impl From<ContractViolation> for ModelError {
    fn from(violation: ContractViolation) -> Self {
        ModelError::Call(CallError::Contract(violation))
    }
}

pub type ModelResult<T> = Result<T, ModelError>;

/// Wire-level access to one reasoning backend.
///
/// Implementations translate a [`ChatRequest`] to the backend's own format,
/// run every HTTP attempt through their [`RetryPolicy`](crate::retry::RetryPolicy)
/// and translate the reply back. They hold no per-call mutable state.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn chat(&self, request: ChatRequest) -> ModelResult<ChatResponse>;

    fn provider_name(&self) -> &'static str;

    /// Model identifier sent with each request.
    fn model(&self) -> &str;

    /// Whether the backend can be constrained with a response schema. When it
    /// cannot, the schema is described inside the instruction instead.
    fn supports_structured_output(&self) -> bool {
        true
    }
}
