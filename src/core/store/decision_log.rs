use anyhow::{Result, anyhow};
use rusqlite::params;

use super::TurnStore;
use crate::core::types::{DecisionLogEntry, DecisionStep};

impl TurnStore {
    /// Append one audit row. Purely observational; the orchestrator never
    /// reads these back to make decisions.
    pub async fn record_decision(
        &self,
        execution_id: &str,
        turn_id: &str,
        step: DecisionStep,
        payload: &serde_json::Value,
        success: bool,
        duration_ms: u64,
    ) -> Result<()> {
        let db = self.db.lock().await;
        db.execute(
            "INSERT INTO decision_log (execution_id, turn_id, step, payload_json, success, duration_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                execution_id,
                turn_id,
                step.as_str(),
                serde_json::to_string(payload)?,
                success,
                duration_ms as i64
            ],
        )?;
        Ok(())
    }

    pub async fn list_decisions(
        &self,
        execution_id: &str,
        after_id: i64,
        limit: usize,
    ) -> Result<Vec<DecisionLogEntry>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT id, execution_id, turn_id, step, payload_json, success, duration_ms, created_at \
             FROM decision_log WHERE execution_id = ?1 AND id > ?2 ORDER BY id ASC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![execution_id, after_id, limit as i64], |row| {
            Ok((
                DecisionLogEntry {
                    id: row.get(0)?,
                    execution_id: row.get(1)?,
                    turn_id: row.get(2)?,
                    step: DecisionStep::Error, // patched below
                    payload: serde_json::Value::Null,
                    success: row.get(5)?,
                    duration_ms: row.get::<_, i64>(6)? as u64,
                    created_at: row.get(7)?,
                },
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (mut entry, step_raw, payload_raw) = row?;
            entry.step = DecisionStep::from_status(&step_raw)
                .ok_or_else(|| anyhow!("Unknown decision step in store: {}", step_raw))?;
            entry.payload = serde_json::from_str(&payload_raw)?;
            results.push(entry);
        }
        Ok(results)
    }
}
