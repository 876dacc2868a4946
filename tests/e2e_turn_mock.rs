mod e2e_harness;

use e2e_harness::{DaemonHarness, MockLlmServer, TestResult};
use serde_json::json;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deterministic_conversation_with_a_tool_round() -> TestResult<()> {
    let mock = match MockLlmServer::start().await {
        Ok(server) => server,
        Err(err) if err.to_string().contains("Operation not permitted") => {
            eprintln!("Skipping e2e test: socket bind not permitted");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    mock.script_tool_call("call_1", "echo", json!({"text": "ping"}));
    mock.script_text_reply("The echo tool returned: ping");

    let daemon = match DaemonHarness::spawn(&mock.base_url(), "mock-model-v1").await {
        Ok(daemon) => daemon,
        Err(err) if err.to_string().contains("Operation not permitted") => {
            eprintln!("Skipping e2e test: daemon socket bind not permitted");
            mock.shutdown().await;
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let outcome = daemon
        .post(
            "/api/process",
            json!({
                "execution_id": "e2e-exec-1",
                "message": "please echo ping"
            }),
        )
        .await?;
    assert_eq!(outcome["success"], true, "unexpected outcome: {outcome}");
    assert_eq!(outcome["outcome"], "completed");
    assert_eq!(outcome["reply"], "The echo tool returned: ping");

    // Transcript: user, assistant tool call, tool result, final reply.
    let messages = daemon.get("/api/executions/e2e-exec-1/messages").await?;
    let rows = messages["messages"].as_array().expect("messages array");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0]["role"], "user");
    assert_eq!(rows[1]["tool_calls"][0]["name"], "echo");
    assert_eq!(rows[2]["role"], "tool");
    assert!(rows[2]["content"].as_str().unwrap().contains("ping"));
    assert_eq!(rows[3]["content"], "The echo tool returned: ping");

    // The audit trail shows both model calls and the tool round.
    let decisions = daemon.get("/api/executions/e2e-exec-1/decisions").await?;
    let steps: Vec<&str> = decisions["decisions"]
        .as_array()
        .expect("decisions array")
        .iter()
        .filter_map(|d| d["step"].as_str())
        .collect();
    assert!(steps.contains(&"llm_call"));
    assert!(steps.contains(&"tool_call"));
    assert!(steps.contains(&"tool_result"));
    assert!(steps.contains(&"finalize"));

    // The second model call replayed the tool result on the wire.
    let requests = mock.received_requests();
    assert_eq!(requests.len(), 2);
    let replayed = requests[1]["messages"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["role"] == "tool" && m["tool_call_id"] == "call_1");
    assert!(replayed, "second request should carry the tool result");

    mock.shutdown().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn execution_status_is_queryable_after_a_turn() -> TestResult<()> {
    let mock = match MockLlmServer::start().await {
        Ok(server) => server,
        Err(err) if err.to_string().contains("Operation not permitted") => {
            eprintln!("Skipping e2e test: socket bind not permitted");
            return Ok(());
        }
        Err(err) => return Err(err),
    };
    mock.script_text_reply("hello from the mock");

    let daemon = match DaemonHarness::spawn(&mock.base_url(), "mock-model-v1").await {
        Ok(daemon) => daemon,
        Err(err) if err.to_string().contains("Operation not permitted") => {
            eprintln!("Skipping e2e test: daemon socket bind not permitted");
            mock.shutdown().await;
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let outcome = daemon
        .post(
            "/api/process",
            json!({ "execution_id": "e2e-exec-2", "message": "hi" }),
        )
        .await?;
    assert_eq!(outcome["outcome"], "completed");

    let execution = daemon.get("/api/executions/e2e-exec-2").await?;
    assert_eq!(execution["success"], true);
    assert_eq!(execution["execution"]["status"], "idle");
    assert_eq!(execution["execution"]["cycle_count"], 1);

    let missing = daemon.get("/api/executions/no-such-execution").await?;
    assert_eq!(missing["success"], false);

    mock.shutdown().await;
    Ok(())
}
