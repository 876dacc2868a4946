use axum::{
    Json,
    extract::{Path, Query, State},
};

use super::super::AppState;

pub async fn get_execution_endpoint(
    Path(execution_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.get_execution(&execution_id).await {
        Ok(Some(execution)) => Json(serde_json::json!({
            "success": true,
            "execution": execution,
        })),
        Ok(None) => Json(serde_json::json!({
            "success": false,
            "error": "execution not found"
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

pub async fn get_messages_endpoint(
    Path(execution_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state.store.list_messages(&execution_id).await {
        Ok(messages) => Json(serde_json::json!({
            "success": true,
            "messages": messages,
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

/// Actions parked by the execution's current turn.
pub async fn get_actions_endpoint(
    Path(execution_id): Path<String>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let execution = match state.store.get_execution(&execution_id).await {
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
    match state
        .store
        .list_turn_actions(&execution_id, &execution.current_turn_id)
        .await
    {
        Ok(actions) => Json(serde_json::json!({
            "success": true,
            "turn_id": execution.current_turn_id,
            "actions": actions,
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}

#[derive(serde::Deserialize)]
pub struct DecisionQuery {
    #[serde(default)]
    after_id: i64,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

pub async fn get_decisions_endpoint(
    Path(execution_id): Path<String>,
    Query(query): Query<DecisionQuery>,
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    match state
        .store
        .list_decisions(&execution_id, query.after_id, query.limit.min(1000))
        .await
    {
        Ok(decisions) => Json(serde_json::json!({
            "success": true,
            "decisions": decisions,
        })),
        Err(e) => Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    }
}
