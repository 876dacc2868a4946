use axum::{Json, extract::State};
use tracing::info;

use super::super::AppState;
use super::process::outcome_json;
use crate::core::approval::ApprovalDecision;
use crate::core::bridge::{HandoffPayload, ResumeEvent};

#[derive(serde::Deserialize)]
pub struct DecisionRequest {
    execution_id: String,
    action_id: String,
    /// "approved" or "rejected".
    decision: String,
}

/// Human-in-the-loop callback. Resolves a queued action with an
/// operator decision and carries the turn forward.
pub async fn execute_decision_endpoint(
    State(state): State<AppState>,
    Json(payload): Json<DecisionRequest>,
) -> Json<serde_json::Value> {
    let decision = match payload.decision.as_str() {
        "approved" => ApprovalDecision::Approved,
        "rejected" => ApprovalDecision::Rejected,
        other => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("decision must be 'approved' or 'rejected', got '{}'", other)
            }));
        }
    };

    // The current turn id comes from the store, never from the caller.
    let execution = match state.store.get_execution(&payload.execution_id).await {
        Ok(Some(execution)) => execution,
        Ok(None) => {
            return Json(serde_json::json!({
                "success": false,
                "error": "execution not found"
            }));
        }
        Err(e) => {
            return Json(serde_json::json!({ "success": false, "error": e.to_string() }));
        }
    };

    info!(
        "Operator {} action [{}] on execution [{}]",
        payload.decision, payload.action_id, payload.execution_id
    );
    let resume = state
        .coordinator
        .resume_turn(HandoffPayload {
            execution_id: payload.execution_id,
            turn_id: execution.current_turn_id,
            cycle_count: execution.cycle_count,
            chain_depth: 0,
            event: ResumeEvent::Approval {
                action_id: payload.action_id,
                decision,
            },
        })
        .await;

    match resume {
        Ok(outcome) => Json(outcome_json(&outcome)),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
