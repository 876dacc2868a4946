use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use crate::core::gateway::RetryConfig;
use crate::core::turn::TurnConfig;

/// Whole-process configuration, read from `turnstile.toml` in the
/// workspace directory. Every section has working defaults; the API key
/// may also arrive via `TURNSTILE_API_KEY`, which wins over the file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub turn: TurnConfig,

    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_profile")]
    pub default_profile: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Transcript rows replayed per model call.
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Capacity of the ordered hand-off queue.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Ceiling on recursive rescheduling through the queue.
    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: u32,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    7781
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_profile() -> String {
    "assistant".to_string()
}
fn default_system_prompt() -> String {
    "You are a careful assistant. Use the provided tools when they help; \
     answer directly when they do not."
        .to_string()
}
fn default_max_history() -> usize {
    200
}
fn default_queue_depth() -> usize {
    64
}
fn default_max_chain_depth() -> u32 {
    16
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_profile: default_profile(),
            system_prompt: default_system_prompt(),
            max_history: default_max_history(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            max_chain_depth: default_max_chain_depth(),
        }
    }
}

impl AppConfig {
    pub async fn load<P: AsRef<Path>>(workspace_dir: P) -> Result<Self> {
        let config_path = workspace_dir.as_ref().join("turnstile.toml");
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Reading {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Parsing {}", config_path.display()))?
        } else {
            info!("No turnstile.toml found, using defaults.");
            Self::default()
        };

        if let Ok(key) = std::env::var("TURNSTILE_API_KEY")
            && !key.is_empty()
        {
            config.provider.api_key = Some(key);
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_fills_in_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [provider]
            model = "gpt-4o"
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.model, "gpt-4o");
        assert_eq!(config.server.port, 7781);
        assert_eq!(config.turn.max_cycles, 8);
        assert!(config.turn.suppress_transient_output);
        assert_eq!(config.transport.queue_depth, 64);
    }

    #[test]
    fn turn_section_overrides_apply() {
        let config: AppConfig = toml::from_str(
            r#"
            [turn]
            max_cycles = 3
            inline_followup = false
            parallel_tool_batch = true
            suppress_transient_output = false
            approvers = ["ops"]
            "#,
        )
        .unwrap();
        assert_eq!(config.turn.max_cycles, 3);
        assert!(!config.turn.inline_followup);
        assert!(config.turn.parallel_tool_batch);
        assert_eq!(config.turn.approvers, vec!["ops".to_string()]);
    }
}
