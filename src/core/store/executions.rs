use anyhow::{Result, anyhow};
use rusqlite::params;

use super::TurnStore;
use crate::core::types::{Execution, ExecutionStatus};

fn row_to_execution(row: &rusqlite::Row<'_>) -> rusqlite::Result<(Execution, String)> {
    let status_raw: String = row.get(3)?;
    Ok((
        Execution {
            execution_id: row.get(0)?,
            owner: row.get(1)?,
            agent_profile: row.get(2)?,
            // Placeholder, patched by the caller once the raw status parses.
            status: ExecutionStatus::Idle,
            current_turn_id: row.get(4)?,
            cycle_count: row.get::<_, i64>(5)? as u32,
            updated_at: row.get(6)?,
        },
        status_raw,
    ))
}

impl TurnStore {
    pub async fn create_execution(
        &self,
        execution_id: &str,
        owner: &str,
        agent_profile: &str,
    ) -> Result<Execution> {
        let db = self.db.lock().await;
        let turn_id = uuid::Uuid::new_v4().to_string();
        db.execute(
            "INSERT INTO executions (execution_id, owner, agent_profile, status, current_turn_id, cycle_count) \
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![
                execution_id,
                owner,
                agent_profile,
                ExecutionStatus::Idle.as_str(),
                turn_id
            ],
        )?;
        drop(db);
        self.get_execution(execution_id)
            .await?
            .ok_or_else(|| anyhow!("Execution vanished immediately after insert"))
    }

    pub async fn get_execution(&self, execution_id: &str) -> Result<Option<Execution>> {
        let db = self.db.lock().await;
        let mut stmt = db.prepare(
            "SELECT execution_id, owner, agent_profile, status, current_turn_id, cycle_count, updated_at \
             FROM executions WHERE execution_id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![execution_id])?;
        if let Some(row) = rows.next()? {
            let (mut execution, status_raw) = row_to_execution(row)?;
            execution.status = ExecutionStatus::from_status(&status_raw)
                .ok_or_else(|| anyhow!("Unknown execution status in store: {}", status_raw))?;
            Ok(Some(execution))
        } else {
            Ok(None)
        }
    }

    /// Compare-and-set transition. The write lands only if the row still
    /// carries the (status, turn) pair the caller read; a `false` return
    /// means a concurrent writer advanced the execution first and this
    /// update must be discarded, not retried blindly.
    #[allow(clippy::too_many_arguments)]
    pub async fn transition_execution(
        &self,
        execution_id: &str,
        expect_status: ExecutionStatus,
        expect_turn_id: &str,
        new_status: ExecutionStatus,
        new_turn_id: &str,
        new_cycle_count: u32,
    ) -> Result<bool> {
        let db = self.db.lock().await;
        let changed = db.execute(
            "UPDATE executions \
             SET status = ?1, current_turn_id = ?2, cycle_count = ?3, updated_at = CURRENT_TIMESTAMP \
             WHERE execution_id = ?4 AND status = ?5 AND current_turn_id = ?6",
            params![
                new_status.as_str(),
                new_turn_id,
                new_cycle_count as i64,
                execution_id,
                expect_status.as_str(),
                expect_turn_id
            ],
        )?;
        Ok(changed == 1)
    }
}
