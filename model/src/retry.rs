//! Resilient call execution shared by every outbound network call.
//!
//! [`RetryPolicy::execute`] drives a zero-argument attempt closure with bounded
//! retries, exponential backoff and an overall deadline. Every attempt receives a
//! [`CallContext`] so it can bound its own request timeout by the time left.
//!
//! Classification is uniform across callers:
//!
//! | Outcome of an attempt                         | Action                 |
//! |-----------------------------------------------|------------------------|
//! | transport error / header timeout              | retry                  |
//! | HTTP 429, 500, 502, 503, 504                  | retry (body drained)   |
//! | any other non-2xx                             | fail, no retry         |
//! | 2xx with a body that does not match the shape | fail, no retry         |
//! | overall deadline elapsed                      | abort, no retry        |

use rand::Rng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Statuses that indicate a transient fault on the far side.
pub const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// A 2xx reply whose payload cannot be trusted.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContractViolation {
    #[error("empty payload: {context}")]
    EmptyPayload { context: String },

    #[error("no candidate outputs returned")]
    NoCandidates,

    #[error("payload does not match the expected shape: {message}")]
    Schema { message: String },

    #[error("field `{field}` out of range: {value}")]
    OutOfRange { field: String, value: f64 },
}

impl ContractViolation {
    pub fn schema(err: impl std::fmt::Display) -> Self {
        Self::Schema {
            message: err.to_string(),
        }
    }
}

/// Classified failure of one outbound call.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("remote returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request could not be built: {message}")]
    Request { message: String },

    #[error("backend contract violation: {0}")]
    Contract(#[from] ContractViolation),

    #[error("deadline of {deadline:?} exceeded after {attempts} attempt(s)")]
    DeadlineExceeded { deadline: Duration, attempts: u32 },

    #[error("giving up after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        #[source]
        last: Box<CallError>,
    },
}

impl CallError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Transport { .. } => true,
            CallError::Status { status, .. } => RETRYABLE_STATUSES.contains(status),
            _ => false,
        }
    }

    /// Status code of the failing reply, looking through exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::Status { status, .. } => Some(*status),
            CallError::Exhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    pub fn is_contract_violation(&self) -> bool {
        matches!(self, CallError::Contract(_))
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, CallError::DeadlineExceeded { .. })
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            CallError::Request {
                message: err.to_string(),
            }
        } else if err.is_timeout() {
            CallError::Transport {
                message: format!("request timed out: {}", err),
            }
        } else if err.is_connect() {
            CallError::Transport {
                message: format!("cannot connect: {}", err),
            }
        } else {
            CallError::Transport {
                message: err.to_string(),
            }
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;

/// Retry and deadline parameters for outbound calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt; doubled for each further attempt
    pub base_delay: Duration,
    /// Upper bound for a single backoff delay
    pub max_delay: Duration,
    /// Overall budget for all attempts and backoff sleeps together
    pub deadline: Duration,
    /// Jitter factor for randomizing retry delays (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            deadline: Duration::from_secs(90),
            jitter_factor: 0.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    /// Delay to sleep after the failed attempt with zero-based index `retry`
    pub fn calculate_retry_delay(&self, retry: u32) -> Duration {
        let exponential_delay = self
            .base_delay
            .checked_mul(2_u32.saturating_pow(retry))
            .unwrap_or(self.max_delay);
        let delay = exponential_delay.min(self.max_delay);

        if self.jitter_factor > 0.0 {
            let mut rng = rand::thread_rng();
            let jitter = rng.gen_range(0.0..=self.jitter_factor);
            let jitter_ms = (delay.as_millis() as f64 * jitter) as u64;
            delay + Duration::from_millis(jitter_ms)
        } else {
            delay
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_attempts == 0 {
            return Err("Retry attempts must be greater than 0".to_string());
        }

        if self.deadline.is_zero() {
            return Err("Call deadline must be greater than 0".to_string());
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err("Jitter factor must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }
}

/// Per-attempt view of the call: which attempt this is and when the call must end.
#[derive(Debug, Clone, Copy)]
pub struct CallContext {
    pub attempt: u32,
    deadline: Instant,
}

impl CallContext {
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Time left before the overall deadline; zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Executes attempt closures under a [`RetryConfig`].
///
/// Holds no mutable state, so one policy can be shared by any number of
/// concurrent calls.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `attempt` until it succeeds, fails permanently, exhausts the attempt
    /// budget, or the overall deadline passes.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut attempt: F) -> CallResult<T>
    where
        F: FnMut(CallContext) -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let config = &self.config;
        let deadline = Instant::now() + config.deadline;
        let max_attempts = config.max_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let context = CallContext {
                attempt: attempts,
                deadline,
            };

            let outcome = match tokio::time::timeout_at(deadline, attempt(context)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(operation, attempts, "deadline exceeded during attempt");
                    return Err(CallError::DeadlineExceeded {
                        deadline: config.deadline,
                        attempts,
                    });
                }
            };

            let err = match outcome {
                Ok(value) => {
                    if attempts > 1 {
                        debug!(operation, attempts, "call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                debug!(operation, attempts, error = %err, "permanent failure, not retrying");
                return Err(err);
            }

            if attempts >= max_attempts {
                warn!(operation, attempts, error = %err, "retry budget exhausted");
                return Err(CallError::Exhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            let delay = config.calculate_retry_delay(attempts - 1);
            if Instant::now() + delay >= deadline {
                warn!(operation, attempts, ?delay, "backoff would pass the deadline");
                return Err(CallError::DeadlineExceeded {
                    deadline: config.deadline,
                    attempts,
                });
            }

            warn!(
                operation,
                attempt = attempts,
                max_attempts,
                ?delay,
                error = %err,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Turn a non-2xx reply into [`CallError::Status`], reading the body to the end
/// so the connection is released before any retry.
pub async fn ensure_success(response: reqwest::Response) -> CallResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(CallError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Read a successful reply body in full.
pub async fn read_body(response: reqwest::Response) -> CallResult<Vec<u8>> {
    let bytes = response.bytes().await?;
    Ok(bytes.to_vec())
}

/// Send one request and decode a 2xx JSON body into `R`.
///
/// A body that does not decode is a contract violation, never a transient fault.
pub async fn fetch_json<R: DeserializeOwned>(request: reqwest::RequestBuilder) -> CallResult<R> {
    let response = ensure_success(request.send().await?).await?;
    let body = read_body(response).await?;
    serde_json::from_slice(&body)
        .map_err(|err| CallError::Contract(ContractViolation::schema(err)))
}
