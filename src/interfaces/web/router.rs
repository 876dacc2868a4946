use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware,
    middleware::Next,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use super::AppState;
use super::handlers::{executions, hitl, process};

fn build_localhost_cors(port: u16) -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        format!("http://127.0.0.1:{}", port),
        format!("http://localhost:{}", port),
    ]
    .iter()
    .filter_map(|o| o.parse().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(tower_http::cors::Any)
}

pub fn build_api_router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_endpoint))
        .route("/api/process", post(process::process_endpoint))
        .route("/api/hitl/execute", post(hitl::execute_decision_endpoint))
        .route(
            "/api/executions/{execution_id}",
            get(executions::get_execution_endpoint),
        )
        .route(
            "/api/executions/{execution_id}/messages",
            get(executions::get_messages_endpoint),
        )
        .route(
            "/api/executions/{execution_id}/actions",
            get(executions::get_actions_endpoint),
        )
        .route(
            "/api/executions/{execution_id}/decisions",
            get(executions::get_decisions_endpoint),
        )
        .route("/api/events", get(super::sse_events_endpoint))
        .route("/api/logs", get(super::sse_logs_endpoint))
        .layer(middleware::from_fn(security_headers))
        .layer(build_localhost_cors(state.port))
        .with_state(state)
}

async fn health_endpoint() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "success": true, "status": "ok" }))
}

async fn security_headers(req: Request<Body>, next: Next) -> axum::response::Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'",
        ),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::Arc;
    use tower::util::ServiceExt;

    use crate::core::approval::NotifyApprovalWorkflow;
    use crate::core::bridge::LocalTransport;
    use crate::core::dispatch::CapabilityRegistry;
    use crate::core::gateway::{
        ChatMessage, GatewayError, ModelGateway, ModelProvider, ModelReply, RetryConfig,
    };
    use crate::core::notify::Notifier;
    use crate::core::prompt::TranscriptPromptBuilder;
    use crate::core::store::TurnStore;
    use crate::core::turn::{TurnConfig, TurnCoordinator};

    struct NullProvider;

    #[async_trait::async_trait]
    impl ModelProvider for NullProvider {
        fn name(&self) -> &str {
            "null"
        }

        async fn send(
            &self,
            _messages: &[ChatMessage],
            _tool_schemas: &[serde_json::Value],
        ) -> Result<ModelReply, GatewayError> {
            Err(GatewayError::InvalidRequest("no provider in tests".into()))
        }
    }

    async fn test_state() -> (tempfile::TempDir, AppState) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(TurnStore::open(dir.path()).await.expect("open store"));
        let gateway = Arc::new(ModelGateway::new(
            Arc::new(NullProvider),
            store.clone(),
            RetryConfig {
                max_attempts: 1,
                base_delay_ms: 1,
            },
        ));
        let notifier = Notifier::new(8);
        let (log_tx, _) = tokio::sync::broadcast::channel(8);
        let (transport, _receivers) = LocalTransport::new(4, 4);
        let coordinator = Arc::new(TurnCoordinator::new(
            store.clone(),
            gateway,
            Arc::new(CapabilityRegistry::new()),
            Arc::new(TranscriptPromptBuilder::new("test", 50)),
            Arc::new(NotifyApprovalWorkflow::new(notifier.clone())),
            transport,
            notifier.clone(),
            TurnConfig::default(),
        ));
        let state = AppState {
            coordinator,
            store,
            notifier,
            log_tx,
            port: 0,
            default_owner: "local".to_string(),
            default_profile: "assistant".to_string(),
        };
        (dir, state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .expect("read body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_endpoint_carries_security_headers() {
        let (_dir, state) = test_state().await;
        let app = build_api_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn process_rejects_an_empty_message() {
        let (_dir, state) = test_state().await;
        let app = build_api_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/process")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"execution_id":"exec-1","message":"   "}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn unknown_execution_lookup_reports_not_found() {
        let (_dir, state) = test_state().await;
        let app = build_api_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/executions/ghost")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "execution not found");
    }

    #[tokio::test]
    async fn hitl_rejects_a_malformed_decision() {
        let (_dir, state) = test_state().await;
        let app = build_api_router(state);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/hitl/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"execution_id":"exec-1","action_id":"act-1","decision":"maybe"}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().unwrap().contains("approved"));
    }
}
