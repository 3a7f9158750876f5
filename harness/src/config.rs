//! Process configuration, read once at startup.
//!
//! [`AppConfig::from_env`] loads `.env` (if present) and the process
//! environment into an immutable value that is handed to every constructor.
//! Nothing else in the crate reads environment variables.

use model::{ProviderConfig, ProviderKind, RetryConfig};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_PROVIDER: ProviderKind = ProviderKind::Cohere;
pub const DEFAULT_CHANNEL_ID: &str = "ivr-default";
pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_MAX_TURNS: u32 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {key}")]
    Missing { key: String },

    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Values supplied on the command line that take precedence over the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub provider: Option<ProviderKind>,
    pub model: Option<String>,
    pub concurrency: Option<usize>,
    pub max_turns: Option<u32>,
}

/// Respondent endpoint and client-credentials settings.
///
/// Credentials are optional here: their absence is reported by the transport
/// on the first credential acquisition, before any network call.
#[derive(Clone, Serialize)]
pub struct RespondentConfig {
    pub message_url: String,
    pub token_url: Option<String>,
    #[serde(skip)]
    pub client_id: Option<String>,
    #[serde(skip)]
    pub client_secret: Option<String>,
    pub tenant: Option<String>,
    pub channel_id: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl fmt::Debug for RespondentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RespondentConfig")
            .field("message_url", &self.message_url)
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("tenant", &self.tenant)
            .field("channel_id", &self.channel_id)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RespondentConfig {
    pub fn new(message_url: impl Into<String>) -> Self {
        Self {
            message_url: message_url.into(),
            token_url: None,
            client_id: None,
            client_secret: None,
            tenant: None,
            channel_id: DEFAULT_CHANNEL_ID.to_string(),
            timeout: Duration::from_secs(15),
            retry: RetryConfig::default(),
        }
    }

    pub fn with_credentials(
        mut self,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.token_url = Some(token_url.into());
        self.client_id = Some(client_id.into());
        self.client_secret = Some(client_secret.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Scheduler limits.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchedulerConfig {
    /// Scenario runs allowed in flight at once
    pub concurrency: usize,
    /// Turn budget given to scenarios that do not carry their own
    pub default_turn_budget: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            default_turn_budget: DEFAULT_MAX_TURNS,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub provider: ProviderConfig,
    pub respondent: RespondentConfig,
    pub scheduler: SchedulerConfig,
}

impl AppConfig {
    /// Load `.env` and read the process environment.
    pub fn from_env(overrides: &ConfigOverrides) -> ConfigResult<Self> {
        // A missing .env file is normal outside development
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok(), overrides)
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F, overrides: &ConfigOverrides) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let kind = match overrides.provider {
            Some(kind) => kind,
            None => match get("EVALUATOR_PROVIDER") {
                Some(raw) => raw.parse::<ProviderKind>().map_err(|e| ConfigError::Invalid {
                    key: "EVALUATOR_PROVIDER".to_string(),
                    message: e.to_string(),
                })?,
                None => DEFAULT_PROVIDER,
            },
        };

        let mut provider = ProviderConfig::new(kind);
        if let Some(model) = overrides.model.clone().or_else(|| get("EVALUATOR_MODEL")) {
            provider = provider.with_model(model);
        }
        if let Some(base_url) = get("EVALUATOR_BASE_URL") {
            provider = provider.with_base_url(base_url);
        }
        if let Some(key_var) = kind.api_key_env() {
            let key = get(key_var).ok_or_else(|| ConfigError::Missing {
                key: key_var.to_string(),
            })?;
            provider = provider.with_api_key(key);
        }
        if let Some(structured) = parse_var::<bool, _>(&get, "EVALUATOR_STRUCTURED_OUTPUT")? {
            provider = provider.with_structured_output(structured);
        }
        provider.validate().map_err(|message| ConfigError::Invalid {
            key: "EVALUATOR_PROVIDER".to_string(),
            message,
        })?;

        let message_url = get("RESPONDENT_MESSAGE_URL").ok_or_else(|| ConfigError::Missing {
            key: "RESPONDENT_MESSAGE_URL".to_string(),
        })?;
        let respondent = RespondentConfig {
            token_url: get("RESPONDENT_TOKEN_URL"),
            client_id: get("RESPONDENT_CLIENT_ID"),
            client_secret: get("RESPONDENT_CLIENT_SECRET"),
            tenant: get("RESPONDENT_TENANT"),
            channel_id: get("RESPONDENT_CHANNEL_ID")
                .unwrap_or_else(|| DEFAULT_CHANNEL_ID.to_string()),
            ..RespondentConfig::new(message_url)
        };

        let concurrency = match overrides.concurrency {
            Some(n) => n,
            None => parse_var(&get, "EVALUATOR_CONCURRENCY")?.unwrap_or(DEFAULT_CONCURRENCY),
        };
        if concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "EVALUATOR_CONCURRENCY".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let max_turns = match overrides.max_turns {
            Some(n) => n,
            None => parse_var(&get, "EVALUATOR_MAX_TURNS")?.unwrap_or(DEFAULT_MAX_TURNS),
        };
        if max_turns == 0 {
            return Err(ConfigError::Invalid {
                key: "EVALUATOR_MAX_TURNS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            provider,
            respondent,
            scheduler: SchedulerConfig {
                concurrency,
                default_turn_budget: max_turns,
            },
        })
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                message: format!("'{}': {}", raw, e),
            })
        })
        .transpose()
}
