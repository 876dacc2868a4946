pub mod builtin;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

/// Max chars of capability output fed back into the model context.
const OUTCOME_CONTENT_MAX_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Runs in the current unit of work; the result feeds the follow-up
    /// model call directly.
    Inline,
    /// Parked as a pending action and handed off; a later resumption
    /// carries the result back in.
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any handler failure ends the turn with a sanitized user-facing
    /// explanation; no further cycles run.
    HaltAndReport,
    /// The failure is wrapped as a failed tool result and fed back so the
    /// model can recover on the next cycle.
    ContinueWithContext,
}

/// Declarative description of one capability, fixed at registration time.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CapabilitySpec {
    pub name: String,
    pub description: String,
    /// JSON-schema object for the arguments.
    pub parameters: serde_json::Value,
    pub execution_mode: ExecutionMode,
    pub failure_policy: FailurePolicy,
    pub requires_approval: bool,
}

impl CapabilitySpec {
    /// OpenAI function-calling schema for this capability.
    pub fn tool_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Structured result of one capability invocation. Handlers return this
/// instead of throwing across the component boundary.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum ActionOutcome {
    Success { payload: serde_json::Value },
    Failure { code: String, message: String },
}

impl ActionOutcome {
    pub fn success(payload: serde_json::Value) -> Self {
        ActionOutcome::Success { payload }
    }

    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        ActionOutcome::Failure {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ActionOutcome::Success { .. })
    }

    /// Render as `tool` message content for the follow-up model call.
    /// Internal detail is truncated, never forwarded unbounded.
    pub fn as_tool_content(&self) -> String {
        let text = match self {
            ActionOutcome::Success { payload } => payload.to_string(),
            ActionOutcome::Failure { code, message } => {
                serde_json::json!({ "error": code, "message": message }).to_string()
            }
        };
        if text.chars().count() > OUTCOME_CONTENT_MAX_CHARS {
            let truncated: String = text.chars().take(OUTCOME_CONTENT_MAX_CHARS).collect();
            format!("{}… [truncated]", truncated)
        } else {
            text
        }
    }
}

/// Ambient facts a handler may need; never trusted business data.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub execution_id: String,
    pub turn_id: String,
    pub tool_call_id: String,
}

#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    fn spec(&self) -> &CapabilitySpec;

    async fn execute(&self, arguments: &serde_json::Value, ctx: &ActionContext) -> ActionOutcome;
}

/// Name → handler map, populated once at startup from configuration.
/// No runtime reflection: resolving an unknown name is a configuration
/// error surfaced to the caller.
#[derive(Default)]
pub struct CapabilityRegistry {
    handlers: HashMap<String, Arc<dyn CapabilityHandler>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn CapabilityHandler>) {
        let name = handler.spec().name.clone();
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!("Capability '{}' registered twice; keeping the newer handler", name);
        }
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CapabilityHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn tool_schemas(&self) -> Vec<serde_json::Value> {
        let mut specs: Vec<&CapabilitySpec> =
            self.handlers.values().map(|h| h.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs.iter().map(|s| s.tool_schema()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Shared invocation wrapper: argument validation against the declared
/// schema, then outcome normalization. Every dispatch path goes through
/// here so individual handlers stay free of boilerplate.
pub async fn run_capability(
    handler: &Arc<dyn CapabilityHandler>,
    arguments: &serde_json::Value,
    ctx: &ActionContext,
) -> ActionOutcome {
    if let Err(reason) = validate_arguments(handler.spec(), arguments) {
        return ActionOutcome::failure("validation", reason);
    }
    handler.execute(arguments, ctx).await
}

/// Shallow schema check: arguments must be an object (or null when the
/// schema declares no required fields) and every required key present.
fn validate_arguments(spec: &CapabilitySpec, arguments: &serde_json::Value) -> Result<(), String> {
    let required: Vec<&str> = spec
        .parameters
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default();

    match arguments {
        serde_json::Value::Object(map) => {
            for key in &required {
                if !map.contains_key(*key) {
                    return Err(format!("missing required argument '{}'", key));
                }
            }
            Ok(())
        }
        serde_json::Value::Null if required.is_empty() => Ok(()),
        other => Err(format!(
            "arguments must be a JSON object, got {}",
            match other {
                serde_json::Value::Array(_) => "an array",
                serde_json::Value::String(_) => "a string",
                serde_json::Value::Number(_) => "a number",
                serde_json::Value::Bool(_) => "a boolean",
                serde_json::Value::Null => "null",
                serde_json::Value::Object(_) => unreachable!(),
            }
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperCase {
        spec: CapabilitySpec,
    }

    impl UpperCase {
        fn new() -> Self {
            Self {
                spec: CapabilitySpec {
                    name: "upper_case".to_string(),
                    description: "Upper-case a string".to_string(),
                    parameters: serde_json::json!({
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"]
                    }),
                    execution_mode: ExecutionMode::Inline,
                    failure_policy: FailurePolicy::ContinueWithContext,
                    requires_approval: false,
                },
            }
        }
    }

    #[async_trait]
    impl CapabilityHandler for UpperCase {
        fn spec(&self) -> &CapabilitySpec {
            &self.spec
        }

        async fn execute(&self, arguments: &serde_json::Value, _ctx: &ActionContext) -> ActionOutcome {
            match arguments.get("text").and_then(|t| t.as_str()) {
                Some(text) => ActionOutcome::success(serde_json::json!({
                    "text": text.to_uppercase()
                })),
                None => ActionOutcome::failure("validation", "text must be a string"),
            }
        }
    }

    fn ctx() -> ActionContext {
        ActionContext {
            execution_id: "exec-1".to_string(),
            turn_id: "turn-1".to_string(),
            tool_call_id: "call_1".to_string(),
        }
    }

    #[tokio::test]
    async fn wrapper_rejects_missing_required_arguments() {
        let handler: Arc<dyn CapabilityHandler> = Arc::new(UpperCase::new());
        let out = run_capability(&handler, &serde_json::json!({}), &ctx()).await;
        assert!(!out.is_success());
        let content = out.as_tool_content();
        assert!(content.contains("missing required argument"), "{}", content);
    }

    #[tokio::test]
    async fn wrapper_rejects_non_object_arguments() {
        let handler: Arc<dyn CapabilityHandler> = Arc::new(UpperCase::new());
        let out = run_capability(&handler, &serde_json::json!("just a string"), &ctx()).await;
        assert!(!out.is_success());
    }

    #[tokio::test]
    async fn wrapper_passes_valid_arguments_through() {
        let handler: Arc<dyn CapabilityHandler> = Arc::new(UpperCase::new());
        let out = run_capability(&handler, &serde_json::json!({"text": "hi"}), &ctx()).await;
        assert!(out.is_success());
        assert!(out.as_tool_content().contains("HI"));
    }

    #[test]
    fn registry_resolves_by_name_and_lists_schemas_sorted() {
        let mut registry = CapabilityRegistry::new();
        registry.register(Arc::new(UpperCase::new()));
        assert!(registry.resolve("upper_case").is_some());
        assert!(registry.resolve("missing").is_none());
        let schemas = registry.tool_schemas();
        assert_eq!(schemas.len(), 1);
        assert_eq!(schemas[0]["function"]["name"], "upper_case");
    }

    #[test]
    fn oversized_outcomes_are_truncated_for_the_model() {
        let outcome = ActionOutcome::success(serde_json::json!({
            "blob": "x".repeat(10_000)
        }));
        let content = outcome.as_tool_content();
        assert!(content.ends_with("[truncated]"));
        assert!(content.chars().count() < 4_100);
    }
}
