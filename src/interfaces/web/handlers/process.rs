use axum::{Json, extract::State};
use tracing::info;

use super::super::AppState;
use crate::core::turn::TurnOutcome;

#[derive(serde::Deserialize)]
pub struct ProcessRequest {
    execution_id: String,
    message: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    agent_profile: Option<String>,
}

/// Entry point for a user message. Runs the turn to its first resting
/// point: final reply, suspension or failure.
pub async fn process_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<ProcessRequest>,
) -> Json<serde_json::Value> {
    if payload.message.trim().is_empty() {
        return Json(serde_json::json!({
            "success": false,
            "error": "message must not be empty"
        }));
    }
    let owner = payload.owner.unwrap_or_else(|| state.default_owner.clone());
    let profile = payload
        .agent_profile
        .unwrap_or_else(|| state.default_profile.clone());
    info!("Processing message for execution [{}]", payload.execution_id);

    match state
        .coordinator
        .start_turn(&payload.execution_id, &owner, &profile, &payload.message)
        .await
    {
        Ok(outcome) => Json(outcome_json(&outcome)),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub(crate) fn outcome_json(outcome: &TurnOutcome) -> serde_json::Value {
    match outcome {
        TurnOutcome::Completed { reply } => serde_json::json!({
            "success": true,
            "outcome": "completed",
            "reply": reply,
        }),
        TurnOutcome::Suspended { status } => serde_json::json!({
            "success": true,
            "outcome": "suspended",
            "status": status.as_str(),
        }),
        TurnOutcome::Superseded => serde_json::json!({
            "success": true,
            "outcome": "superseded",
        }),
        TurnOutcome::Busy => serde_json::json!({
            "success": false,
            "outcome": "busy",
            "error": "execution is mid-turn; try again once it settles",
        }),
        TurnOutcome::Failed { message } => serde_json::json!({
            "success": false,
            "outcome": "failed",
            "error": message,
        }),
    }
}
