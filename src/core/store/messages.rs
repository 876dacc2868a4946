use anyhow::{Result, anyhow};
use rusqlite::params;

use super::TurnStore;
use crate::core::types::{MessageRecord, NewMessage, Role, ToolCall};

impl TurnStore {
    /// Append one transcript row. Rows are immutable after this point;
    /// insert order is the conversation order.
    pub async fn append_message(
        &self,
        execution_id: &str,
        turn_id: &str,
        message: NewMessage,
    ) -> Result<i64> {
        let role = message
            .role
            .ok_or_else(|| anyhow!("Message role is required"))?;
        let tool_calls_json = message
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO messages \
             (execution_id, turn_id, role, content, tool_calls_json, tool_call_id, input_tokens, output_tokens, latency_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                execution_id,
                turn_id,
                role.as_str(),
                message.content,
                tool_calls_json,
                message.tool_call_id,
                message.input_tokens as i64,
                message.output_tokens as i64,
                message.latency_ms as i64
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Full transcript for an execution in strict creation order.
    pub async fn list_messages(&self, execution_id: &str) -> Result<Vec<MessageRecord>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, execution_id, turn_id, role, content, tool_calls_json, tool_call_id, \
                    input_tokens, output_tokens, latency_ms, created_at \
             FROM messages WHERE execution_id = ?1 ORDER BY id ASC",
        )?;
        let rows = stmt.query_map(params![execution_id], |row| {
            Ok((
                MessageRecord {
                    id: row.get(0)?,
                    execution_id: row.get(1)?,
                    turn_id: row.get(2)?,
                    role: Role::User, // patched below
                    content: row.get(4)?,
                    tool_calls: None,
                    tool_call_id: row.get(6)?,
                    input_tokens: row.get::<_, i64>(7)? as u64,
                    output_tokens: row.get::<_, i64>(8)? as u64,
                    latency_ms: row.get::<_, i64>(9)? as u64,
                    created_at: row.get(10)?,
                },
                row.get::<_, String>(3)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (mut record, role_raw, calls_raw) = row?;
            record.role = Role::from_status(&role_raw)
                .ok_or_else(|| anyhow!("Unknown message role in store: {}", role_raw))?;
            if let Some(json) = calls_raw {
                record.tool_calls = Some(serde_json::from_str::<Vec<ToolCall>>(&json)?);
            }
            results.push(record);
        }
        Ok(results)
    }
}
