//! Starter capabilities so a fresh install is exercisable end to end.
//! Real deployments register their own handler set at startup.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

use super::{
    ActionContext, ActionOutcome, CapabilityHandler, CapabilitySpec, ExecutionMode, FailurePolicy,
};

const HTTP_GET_TIMEOUT_SECS: u64 = 15;
const HTTP_GET_BODY_MAX_CHARS: usize = 8000;

pub struct EchoCapability {
    spec: CapabilitySpec,
}

impl EchoCapability {
    pub fn new() -> Self {
        Self {
            spec: CapabilitySpec {
                name: "echo".to_string(),
                description: "Echo the given text back verbatim. Useful for connectivity checks."
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "text": { "type": "string", "description": "Text to echo back" }
                    },
                    "required": ["text"]
                }),
                execution_mode: ExecutionMode::Inline,
                failure_policy: FailurePolicy::ContinueWithContext,
                requires_approval: false,
            },
        }
    }
}

impl Default for EchoCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHandler for EchoCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, arguments: &serde_json::Value, _ctx: &ActionContext) -> ActionOutcome {
        match arguments.get("text").and_then(|t| t.as_str()) {
            Some(text) => ActionOutcome::success(serde_json::json!({ "text": text })),
            None => ActionOutcome::failure("validation", "text must be a string"),
        }
    }
}

pub struct HttpGetCapability {
    spec: CapabilitySpec,
    client: Client,
}

impl HttpGetCapability {
    pub fn new() -> Self {
        Self {
            spec: CapabilitySpec {
                name: "http_get".to_string(),
                description: "Fetch a URL over HTTP GET and return the response body as text."
                    .to_string(),
                parameters: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "url": { "type": "string", "description": "Absolute http(s) URL" }
                    },
                    "required": ["url"]
                }),
                execution_mode: ExecutionMode::Inline,
                failure_policy: FailurePolicy::ContinueWithContext,
                requires_approval: false,
            },
            client: Client::new(),
        }
    }
}

impl Default for HttpGetCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CapabilityHandler for HttpGetCapability {
    fn spec(&self) -> &CapabilitySpec {
        &self.spec
    }

    async fn execute(&self, arguments: &serde_json::Value, _ctx: &ActionContext) -> ActionOutcome {
        let Some(url) = arguments.get("url").and_then(|u| u.as_str()) else {
            return ActionOutcome::failure("validation", "url must be a string");
        };
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ActionOutcome::failure("validation", "url must be absolute http(s)");
        }

        let response = match self
            .client
            .get(url)
            .timeout(Duration::from_secs(HTTP_GET_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return ActionOutcome::failure("fetch", e.to_string()),
        };

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let body: String = body.chars().take(HTTP_GET_BODY_MAX_CHARS).collect();

        if status.is_success() {
            ActionOutcome::success(serde_json::json!({
                "status": status.as_u16(),
                "body": body
            }))
        } else {
            ActionOutcome::failure("http_status", format!("{}: {}", status, body))
        }
    }
}
