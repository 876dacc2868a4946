mod openai;

pub use openai::OpenAiCompatProvider;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::store::TurnStore;
use crate::core::types::{DecisionStep, ToolCall};

/// Wire-format chat entry handed to a provider adapter. The prompt builder
/// produces these; the gateway never inspects their content.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Option<Vec<ToolCall>>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// One raw provider reply: text, zero or more structured tool calls, usage.
#[derive(Debug, Clone, Default)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub usage: TokenUsage,
}

/// Classified provider failure. Retryable variants feed the backoff loop;
/// everything else aborts the call immediately.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("provider request timed out: {0}")]
    Timeout(String),
    #[error("provider rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_secs: Option<u64>,
    },
    #[error("provider unavailable: {0}")]
    Upstream(String),
    #[error("provider rejected credentials: {0}")]
    Auth(String),
    #[error("malformed provider request: {0}")]
    InvalidRequest(String),
    #[error("provider quota exhausted: {0}")]
    QuotaExhausted(String),
    #[error("unparseable provider response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::Timeout(_)
                | GatewayError::RateLimited { .. }
                | GatewayError::Upstream(_)
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "timeout",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::Upstream(_) => "upstream",
            GatewayError::Auth(_) => "auth",
            GatewayError::InvalidRequest(_) => "invalid_request",
            GatewayError::QuotaExhausted(_) => "quota_exhausted",
            GatewayError::InvalidResponse(_) => "invalid_response",
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn send(
        &self,
        messages: &[ChatMessage],
        tool_schemas: &[serde_json::Value],
    ) -> Result<ModelReply, GatewayError>;
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct RetryConfig {
    /// Total attempts for one logical call, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Successful gateway call plus the bookkeeping the coordinator wants.
#[derive(Debug)]
pub struct GatewayOutcome {
    pub reply: ModelReply,
    pub attempts: u32,
    pub latency_ms: u64,
}

/// Owns retry/backoff and failure classification for model calls. Every
/// attempt, success and final failure lands in the decision log before the
/// result is surfaced.
pub struct ModelGateway {
    provider: Arc<dyn ModelProvider>,
    store: Arc<TurnStore>,
    retry: RetryConfig,
}

impl ModelGateway {
    pub fn new(provider: Arc<dyn ModelProvider>, store: Arc<TurnStore>, retry: RetryConfig) -> Self {
        Self {
            provider,
            store,
            retry,
        }
    }

    fn retry_delay(&self, attempt: u32, err: &GatewayError) -> Duration {
        if let GatewayError::RateLimited {
            retry_after_secs: Some(seconds),
            ..
        } = err
        {
            return Duration::from_secs((*seconds).min(90));
        }
        let backoff = self
            .retry
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(5_000);
        let jitter = rand::thread_rng().gen_range(0..=backoff / 4 + 1);
        Duration::from_millis(backoff + jitter)
    }

    pub async fn call(
        &self,
        execution_id: &str,
        turn_id: &str,
        messages: &[ChatMessage],
        tool_schemas: &[serde_json::Value],
    ) -> Result<GatewayOutcome, GatewayError> {
        let started = Instant::now();
        let mut last_error: Option<GatewayError> = None;

        for attempt in 0..self.retry.max_attempts {
            debug!(
                "Model call attempt {}/{} via {}",
                attempt + 1,
                self.retry.max_attempts,
                self.provider.name()
            );

            match self.provider.send(messages, tool_schemas).await {
                Ok(reply) => {
                    let latency_ms = started.elapsed().as_millis() as u64;
                    let _ = self
                        .store
                        .record_decision(
                            execution_id,
                            turn_id,
                            DecisionStep::LlmCall,
                            &serde_json::json!({
                                "provider": self.provider.name(),
                                "attempt": attempt + 1,
                                "tool_calls": reply.tool_calls.len(),
                                "content_chars": reply.content.as_deref().map(str::len).unwrap_or(0),
                                "input_tokens": reply.usage.input_tokens,
                                "output_tokens": reply.usage.output_tokens,
                            }),
                            true,
                            latency_ms,
                        )
                        .await;
                    return Ok(GatewayOutcome {
                        reply,
                        attempts: attempt + 1,
                        latency_ms,
                    });
                }
                Err(err) => {
                    warn!("Model call failed (attempt {}): {}", attempt + 1, err);
                    let _ = self
                        .store
                        .record_decision(
                            execution_id,
                            turn_id,
                            DecisionStep::LlmCall,
                            &serde_json::json!({
                                "provider": self.provider.name(),
                                "attempt": attempt + 1,
                                "error_kind": err.kind(),
                                "error": err.to_string(),
                                "retryable": err.is_retryable(),
                            }),
                            false,
                            started.elapsed().as_millis() as u64,
                        )
                        .await;

                    if !err.is_retryable() {
                        return Err(err);
                    }
                    let delay = self.retry_delay(attempt, &err);
                    last_error = Some(err);
                    if attempt + 1 < self.retry.max_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            GatewayError::Upstream("model call failed with no recorded error".to_string())
        }))
    }
}
