use anyhow::{Result, anyhow};
use rusqlite::params;

use super::TurnStore;
use crate::core::types::{ActionStatus, PendingAction, ToolCall};

fn row_to_action(row: &rusqlite::Row<'_>) -> rusqlite::Result<(PendingAction, String, String)> {
    Ok((
        PendingAction {
            action_id: row.get(0)?,
            execution_id: row.get(1)?,
            turn_id: row.get(2)?,
            capability: row.get(3)?,
            arguments: serde_json::Value::Null, // patched by caller
            tool_call_id: row.get(5)?,
            status: ActionStatus::Queued, // patched by caller
            created_at: row.get(7)?,
        },
        row.get::<_, String>(4)?,
        row.get::<_, String>(6)?,
    ))
}

impl TurnStore {
    pub async fn insert_pending_action(
        &self,
        execution_id: &str,
        turn_id: &str,
        call: &ToolCall,
        status: ActionStatus,
    ) -> Result<PendingAction> {
        let action_id = uuid::Uuid::new_v4().to_string();
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO pending_actions \
             (action_id, execution_id, turn_id, capability, arguments_json, tool_call_id, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                action_id,
                execution_id,
                turn_id,
                call.name,
                serde_json::to_string(&call.arguments)?,
                call.id,
                status.as_str()
            ],
        )?;
        drop(db);
        self.get_pending_action(&action_id)
            .await?
            .ok_or_else(|| anyhow!("Pending action vanished immediately after insert"))
    }

    pub async fn get_pending_action(&self, action_id: &str) -> Result<Option<PendingAction>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT action_id, execution_id, turn_id, capability, arguments_json, tool_call_id, status, created_at \
             FROM pending_actions WHERE action_id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![action_id])?;
        if let Some(row) = rows.next()? {
            let (mut action, args_raw, status_raw) = row_to_action(row)?;
            action.arguments = serde_json::from_str(&args_raw)?;
            action.status = ActionStatus::from_status(&status_raw)
                .ok_or_else(|| anyhow!("Unknown action status in store: {}", status_raw))?;
            Ok(Some(action))
        } else {
            Ok(None)
        }
    }

    /// Conditional status move. Only succeeds while the row is still in
    /// one of `expect`; this is what makes terminal transitions
    /// at-most-once no matter how often a hand-off is redelivered.
    pub async fn advance_action(
        &self,
        action_id: &str,
        expect: &[ActionStatus],
        to: ActionStatus,
    ) -> Result<bool> {
        if expect.is_empty() {
            return Ok(false);
        }
        // Status names are static enum strings, safe to inline.
        let expected_list = expect
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");
        let resolved = if to.is_terminal() {
            "CURRENT_TIMESTAMP"
        } else {
            "resolved_at"
        };
        let sql = format!(
            "UPDATE pending_actions SET status = ?1, resolved_at = {} \
             WHERE action_id = ?2 AND status IN ({})",
            resolved, expected_list
        );
        let db = self.db.lock().await;
        let changed = db.execute(&sql, params![to.as_str(), action_id])?;
        Ok(changed == 1)
    }

    /// All actions a turn has parked, oldest first.
    pub async fn list_turn_actions(
        &self,
        execution_id: &str,
        turn_id: &str,
    ) -> Result<Vec<PendingAction>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT action_id, execution_id, turn_id, capability, arguments_json, tool_call_id, status, created_at \
             FROM pending_actions WHERE execution_id = ?1 AND turn_id = ?2 ORDER BY created_at ASC, action_id ASC",
        )?;
        let rows = stmt
            .query_map(params![execution_id, turn_id], row_to_action)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let mut actions = Vec::with_capacity(rows.len());
        for (mut action, args_raw, status_raw) in rows {
            action.arguments = serde_json::from_str(&args_raw)?;
            action.status = ActionStatus::from_status(&status_raw)
                .ok_or_else(|| anyhow!("Unknown action status in store: {}", status_raw))?;
            actions.push(action);
        }
        Ok(actions)
    }
}
