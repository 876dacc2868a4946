mod handlers;
mod router;

use anyhow::Result;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::core::notify::Notifier;
use crate::core::store::TurnStore;
use crate::core::turn::TurnCoordinator;

pub struct ApiServer {
    coordinator: Arc<TurnCoordinator>,
    store: Arc<TurnStore>,
    notifier: Notifier,
    log_tx: tokio::sync::broadcast::Sender<String>,
    host: String,
    port: u16,
    default_owner: String,
    default_profile: String,
}

pub struct ApiServerConfig {
    pub coordinator: Arc<TurnCoordinator>,
    pub store: Arc<TurnStore>,
    pub notifier: Notifier,
    pub log_tx: tokio::sync::broadcast::Sender<String>,
    pub host: String,
    pub port: u16,
    pub default_owner: String,
    pub default_profile: String,
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) coordinator: Arc<TurnCoordinator>,
    pub(crate) store: Arc<TurnStore>,
    pub(crate) notifier: Notifier,
    pub(crate) log_tx: tokio::sync::broadcast::Sender<String>,
    pub(crate) port: u16,
    pub(crate) default_owner: String,
    pub(crate) default_profile: String,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig) -> Self {
        Self {
            coordinator: config.coordinator,
            store: config.store,
            notifier: config.notifier,
            log_tx: config.log_tx,
            host: config.host,
            port: config.port,
            default_owner: config.default_owner,
            default_profile: config.default_profile,
        }
    }

    /// Serves until the token is cancelled, then drains in-flight
    /// requests before returning.
    pub async fn serve(self, cancel: CancellationToken) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let state = AppState {
            coordinator: self.coordinator,
            store: self.store,
            notifier: self.notifier,
            log_tx: self.log_tx,
            port: self.port,
            default_owner: self.default_owner,
            default_profile: self.default_profile,
        };
        let app = router::build_api_router(state);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!("API server running at http://{addr}");
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        info!("API server stopped");
        Ok(())
    }
}

// --- SSE streams (used by router) ---

/// Orchestration events: status changes, content, approval requests.
pub(crate) async fn sse_events_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.notifier.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(event) => Ok(Event::default().data(event)),
        Err(_) => Ok(Event::default().data("{\"type\":\"lagged\"}")),
    });
    Sse::new(stream)
}

pub(crate) async fn sse_logs_endpoint(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.log_tx.subscribe();
    let stream = BroadcastStream::new(receiver).map(|msg| match msg {
        Ok(log) => Ok(Event::default().data(log)),
        Err(_) => Ok(Event::default().data("Log stream lagged")),
    });
    Sse::new(stream)
}
