mod config;
mod core;
mod interfaces;
mod logging;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::AppConfig;
use crate::core::approval::NotifyApprovalWorkflow;
use crate::core::bridge::{LocalTransport, spawn_transport_worker};
use crate::core::dispatch::CapabilityRegistry;
use crate::core::dispatch::builtin::{EchoCapability, HttpGetCapability};
use crate::core::gateway::{ModelGateway, OpenAiCompatProvider};
use crate::core::notify::Notifier;
use crate::core::prompt::TranscriptPromptBuilder;
use crate::core::store::TurnStore;
use crate::core::turn::TurnCoordinator;
use crate::interfaces::web::{ApiServer, ApiServerConfig};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("turnstile failed to start: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let workspace_dir = match std::env::var("TURNSTILE_HOME") {
        Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::current_dir().context("Resolving the working directory")?,
    };

    let (log_tx, _) = tokio::sync::broadcast::channel::<String>(500);
    logging::init(log_tx.clone(), false);

    let config = AppConfig::load(&workspace_dir).await?;
    let Some(api_key) = config.provider.api_key.clone() else {
        anyhow::bail!(
            "No provider API key configured. Set TURNSTILE_API_KEY or provider.api_key in turnstile.toml."
        );
    };

    let store = Arc::new(TurnStore::open(&workspace_dir).await?);
    let notifier = Notifier::new(256);

    let provider = Arc::new(OpenAiCompatProvider::new(
        config.provider.base_url.clone(),
        api_key,
        config.provider.model.clone(),
    ));
    let gateway = Arc::new(ModelGateway::new(
        provider,
        store.clone(),
        config.provider.retry.clone(),
    ));

    let mut registry = CapabilityRegistry::new();
    registry.register(Arc::new(EchoCapability::new()));
    registry.register(Arc::new(HttpGetCapability::new()));
    let registry = Arc::new(registry);

    let (transport, receivers) = LocalTransport::new(
        config.transport.queue_depth,
        config.transport.max_chain_depth,
    );
    let approval = Arc::new(NotifyApprovalWorkflow::new(notifier.clone()));
    let prompt = Arc::new(TranscriptPromptBuilder::new(
        config.agent.system_prompt.clone(),
        config.agent.max_history,
    ));

    let coordinator = Arc::new(TurnCoordinator::new(
        store.clone(),
        gateway,
        registry,
        prompt,
        approval,
        transport,
        notifier.clone(),
        config.turn.clone(),
    ));

    let cancel = CancellationToken::new();
    let worker = spawn_transport_worker(receivers, coordinator.clone(), cancel.clone());

    let server = ApiServer::new(ApiServerConfig {
        coordinator,
        store,
        notifier,
        log_tx,
        host: config.server.host.clone(),
        port: config.server.port,
        default_owner: "local".to_string(),
        default_profile: config.agent.default_profile.clone(),
    });

    info!(
        "turnstile starting (model {}, workspace {})",
        config.provider.model,
        workspace_dir.display()
    );

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    });

    server.serve(cancel).await?;
    worker.await.ok();
    Ok(())
}
