#![allow(dead_code)]

use axum::{Json, Router, extract::State, routing::post};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::net::TcpListener;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

pub type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

// --- Mock OpenAI-compatible provider ---

#[derive(Clone)]
struct MockState {
    /// Scripted chat-completion responses, served in order.
    script: Arc<Mutex<VecDeque<Value>>>,
    /// Raw request bodies, for wire-format assertions.
    requests: Arc<Mutex<Vec<Value>>>,
}

pub struct MockLlmServer {
    base_url: String,
    state: MockState,
    shutdown: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockLlmServer {
    pub async fn start() -> TestResult<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;
        let listener = tokio::net::TcpListener::from_std(listener)?;

        let state = MockState {
            script: Arc::new(Mutex::new(VecDeque::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
        };
        let app = Router::new()
            .route("/chat/completions", post(chat_completions))
            .with_state(state.clone());

        let (tx, rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = rx.await;
                })
                .await;
        });

        Ok(Self {
            base_url: format!("http://{}", addr),
            state,
            shutdown: Some(tx),
            handle,
        })
    }

    pub fn base_url(&self) -> String {
        self.base_url.clone()
    }

    pub fn script_text_reply(&self, content: &str) {
        self.push_response(json!({
            "choices": [{
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 6, "total_tokens": 18 }
        }));
    }

    pub fn script_tool_call(&self, call_id: &str, name: &str, arguments: Value) {
        self.push_response(json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": call_id,
                        "type": "function",
                        "function": { "name": name, "arguments": arguments.to_string() }
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": { "prompt_tokens": 20, "completion_tokens": 9, "total_tokens": 29 }
        }));
    }

    fn push_response(&self, response: Value) {
        self.state.script.lock().unwrap().push_back(response);
    }

    pub fn received_requests(&self) -> Vec<Value> {
        self.state.requests.lock().unwrap().clone()
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let _ = self.handle.await;
    }
}

async fn chat_completions(State(state): State<MockState>, Json(body): Json<Value>) -> Json<Value> {
    state.requests.lock().unwrap().push(body);
    let next = state.script.lock().unwrap().pop_front();
    Json(next.unwrap_or_else(|| {
        json!({
            "choices": [{
                "message": { "role": "assistant", "content": "script exhausted" },
                "finish_reason": "stop"
            }]
        })
    }))
}

// --- Daemon under test ---

pub struct DaemonHarness {
    child: Child,
    pub api_port: u16,
    pub api_base: String,
    workspace: tempfile::TempDir,
}

impl DaemonHarness {
    pub async fn spawn(provider_base_url: &str, model: &str) -> TestResult<Self> {
        let api_port = find_free_port()?;
        let workspace = tempfile::tempdir()?;
        write_config(workspace.path(), api_port, provider_base_url, model)?;

        let child = Command::new(env!("CARGO_BIN_EXE_turnstile"))
            .env("TURNSTILE_HOME", workspace.path())
            .env("TURNSTILE_API_KEY", "test-key")
            .env("RUST_LOG", "info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        let harness = Self {
            child,
            api_port,
            api_base: format!("http://127.0.0.1:{}", api_port),
            workspace,
        };
        harness.wait_until_ready().await?;
        Ok(harness)
    }

    async fn wait_until_ready(&self) -> TestResult<()> {
        let client = reqwest::Client::new();
        let url = format!("{}/api/health", self.api_base);
        for _ in 0..100 {
            if let Ok(resp) = client.get(&url).send().await
                && resp.status().is_success()
            {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        Err("daemon did not become ready within 10s".into())
    }

    pub async fn post(&self, path: &str, body: Value) -> TestResult<Value> {
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{}{}", self.api_base, path))
            .json(&body)
            .send()
            .await?;
        Ok(resp.json().await?)
    }

    pub async fn get(&self, path: &str) -> TestResult<Value> {
        let client = reqwest::Client::new();
        let resp = client
            .get(format!("{}{}", self.api_base, path))
            .send()
            .await?;
        Ok(resp.json().await?)
    }
}

impl Drop for DaemonHarness {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn find_free_port() -> TestResult<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn write_config(workspace: &Path, port: u16, base_url: &str, model: &str) -> TestResult<()> {
    let config = format!(
        r#"
[server]
host = "127.0.0.1"
port = {port}

[provider]
base_url = "{base_url}"
model = "{model}"

[provider.retry]
max_attempts = 2
base_delay_ms = 10

[turn]
max_cycles = 6
"#
    );
    std::fs::write(workspace.join("turnstile.toml"), config)?;
    Ok(())
}
