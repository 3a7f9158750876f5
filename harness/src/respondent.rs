//! Access to the conversational system under test.
//!
//! [`RespondentTransport`] is what the scenario runner sees: acquire a session
//! credential once, then send one utterance per turn. [`HttpRespondent`] is the
//! HTTP implementation: a client-credentials token exchange plus a synchronous
//! message endpoint in the Bot Framework activity shape.

use crate::config::RespondentConfig;
use async_trait::async_trait;
use model::retry::{fetch_json, CallError, ContractViolation, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

/// Reply text used when the respondent sent neither text nor a usable card.
pub const NO_RESPONSE_TEXT: &str = "No response text found.";

pub const HERO_CARD_CONTENT_TYPE: &str = "application/vnd.microsoft.card.hero";

/// Header mirroring the conversation id carried in the message body.
pub const CONVERSATION_ID_HEADER: &str = "X-Conversation-Id";

#[derive(Error, Debug)]
pub enum RespondentError {
    #[error("respondent credentials not configured: missing {}", missing.join(", "))]
    MissingCredentials { missing: Vec<&'static str> },

    #[error("respondent rejected the request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error(transparent)]
    Call(CallError),
}

impl From<CallError> for RespondentError {
    fn from(err: CallError) -> Self {
        match err {
            CallError::Status { status, body } => RespondentError::Rejected { status, body },
            other => RespondentError::Call(other),
        }
    }
}

pub type RespondentResult<T> = Result<T, RespondentError>;

/// Bearer credential for one run. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// One reply from the respondent. Every field is optional on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RespondentReply {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "type")]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub attachments: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct HeroCard {
    #[serde(default)]
    text: Option<serde_json::Value>,
    #[serde(default)]
    buttons: Vec<serde_json::Value>,
}

impl RespondentReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Human-readable reply: the text field, else a flattened hero card, else
    /// [`NO_RESPONSE_TEXT`].
    pub fn display_text(&self) -> String {
        match self.text.as_deref() {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => self
                .hero_card_summary()
                .unwrap_or_else(|| NO_RESPONSE_TEXT.to_string()),
        }
    }

    /// The first hero card with at least one button, rendered as a prompt line
    /// and an option list.
    pub fn hero_card_summary(&self) -> Option<String> {
        self.attachments.iter().find_map(|attachment| {
            if attachment.get("contentType")?.as_str()? != HERO_CARD_CONTENT_TYPE {
                return None;
            }
            let card: HeroCard = serde_json::from_value(attachment.get("content")?.clone()).ok()?;
            if card.buttons.is_empty() {
                return None;
            }

            let options: Vec<String> = card
                .buttons
                .iter()
                .filter(|button| button.is_object())
                .map(|button| {
                    format!(
                        "  - {} (value: {})",
                        scalar_text(button.get("title")),
                        scalar_text(button.get("value"))
                    )
                })
                .collect();

            let mut summary = String::new();
            let prompt = scalar_text(card.text.as_ref());
            if !prompt.is_empty() {
                summary.push_str("Prompt: ");
                summary.push_str(&prompt);
                summary.push('\n');
            }
            summary.push_str("Options:\n");
            summary.push_str(&options.join("\n"));
            Some(summary)
        })
    }
}

fn scalar_text(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

#[async_trait]
pub trait RespondentTransport: Send + Sync {
    /// Exchange configured credentials for a session token.
    async fn acquire_session_credential(&self) -> RespondentResult<SessionToken>;

    /// Send one utterance and wait for the reply.
    async fn send_utterance(
        &self,
        project_id: &str,
        token: &SessionToken,
        text: &str,
        conversation_id: &str,
    ) -> RespondentResult<RespondentReply>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingMessage<'a> {
    text: &'a str,
    conversation: ConversationRef<'a>,
    channel_id: &'a str,
    #[serde(rename = "type")]
    activity_type: &'static str,
    attachments: Vec<serde_json::Value>,
    channel_data: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ConversationRef<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    access_token: String,
}

pub struct HttpRespondent {
    client: reqwest::Client,
    config: RespondentConfig,
    retry: RetryPolicy,
}

impl HttpRespondent {
    pub fn new(config: RespondentConfig) -> RespondentResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(CallError::from)?;

        Ok(Self {
            client,
            retry: RetryPolicy::new(config.retry.clone()),
            config,
        })
    }

    /// Token URL, client id and secret, or the names of whichever are missing.
    fn credentials(&self) -> RespondentResult<(&str, &str, &str)> {
        let token_url = self.config.token_url.as_deref().filter(|v| !v.is_empty());
        let client_id = self.config.client_id.as_deref().filter(|v| !v.is_empty());
        let client_secret = self.config.client_secret.as_deref().filter(|v| !v.is_empty());

        match (token_url, client_id, client_secret) {
            (Some(url), Some(id), Some(secret)) => Ok((url, id, secret)),
            _ => {
                let mut missing = Vec::new();
                if token_url.is_none() {
                    missing.push("RESPONDENT_TOKEN_URL");
                }
                if client_id.is_none() {
                    missing.push("RESPONDENT_CLIENT_ID");
                }
                if client_secret.is_none() {
                    missing.push("RESPONDENT_CLIENT_SECRET");
                }
                Err(RespondentError::MissingCredentials { missing })
            }
        }
    }
}

#[async_trait]
impl RespondentTransport for HttpRespondent {
    async fn acquire_session_credential(&self) -> RespondentResult<SessionToken> {
        let (token_url, client_id, client_secret) = self.credentials()?;
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", client_id),
            ("client_secret", client_secret),
        ];

        let response: TokenResponse = self
            .retry
            .execute("respondent.token", |ctx| {
                fetch_json(
                    self.client
                        .post(token_url)
                        .timeout(ctx.remaining().min(self.config.timeout))
                        .form(&form),
                )
            })
            .await?;

        if response.access_token.is_empty() {
            return Err(CallError::from(ContractViolation::EmptyPayload {
                context: "access_token not found in token response".to_string(),
            })
            .into());
        }

        debug!("acquired respondent session token");
        Ok(SessionToken::new(response.access_token))
    }

    async fn send_utterance(
        &self,
        project_id: &str,
        token: &SessionToken,
        text: &str,
        conversation_id: &str,
    ) -> RespondentResult<RespondentReply> {
        let message = OutgoingMessage {
            text: text.trim(),
            conversation: ConversationRef {
                id: conversation_id,
            },
            channel_id: &self.config.channel_id,
            activity_type: "message",
            attachments: Vec::new(),
            channel_data: serde_json::json!({ "responseType": "Text" }),
        };

        let reply: RespondentReply = self
            .retry
            .execute("respondent.send", |ctx| {
                let mut request = self
                    .client
                    .post(&self.config.message_url)
                    .bearer_auth(token.secret())
                    .header("Project", project_id)
                    .header(CONVERSATION_ID_HEADER, conversation_id)
                    .timeout(ctx.remaining().min(self.config.timeout))
                    .json(&message);
                if let Some(tenant) = &self.config.tenant {
                    request = request.header("Tenant", tenant);
                }
                fetch_json(request)
            })
            .await?;

        info!(
            conversation_id,
            attachments = reply.attachments.len(),
            "received respondent reply"
        );
        Ok(reply)
    }
}
