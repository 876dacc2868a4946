mod actions;
mod decision_log;
mod executions;
mod messages;

use anyhow::Result;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;

/// SQLite-backed persistence for executions, messages, pending actions and
/// the decision log. The executions row is the only cross-context shared
/// resource in the system; everything else is written at most once.
pub struct TurnStore {
    db: Arc<Mutex<Connection>>,
}

impl TurnStore {
    pub async fn open<P: AsRef<Path>>(workspace_dir: P) -> Result<Self> {
        let workspace_dir = workspace_dir.as_ref().to_path_buf();
        if !workspace_dir.exists() {
            fs::create_dir_all(&workspace_dir).await?;
        }

        let db_path = workspace_dir.join("turns.db");
        let db = Connection::open(&db_path)?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS executions (
                execution_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                agent_profile TEXT NOT NULL,
                status TEXT NOT NULL,
                current_turn_id TEXT NOT NULL,
                cycle_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                role TEXT NOT NULL,
                content TEXT,
                tool_calls_json TEXT,
                tool_call_id TEXT,
                input_tokens INTEGER NOT NULL DEFAULT 0,
                output_tokens INTEGER NOT NULL DEFAULT 0,
                latency_ms INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS pending_actions (
                action_id TEXT PRIMARY KEY,
                execution_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                capability TEXT NOT NULL,
                arguments_json TEXT NOT NULL,
                tool_call_id TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                resolved_at DATETIME
            )",
            [],
        )?;

        db.execute(
            "CREATE TABLE IF NOT EXISTS decision_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                execution_id TEXT NOT NULL,
                turn_id TEXT NOT NULL,
                step TEXT NOT NULL,
                payload_json TEXT NOT NULL,
                success INTEGER NOT NULL,
                duration_ms INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;

        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_execution_id ON messages(execution_id, id)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_pending_actions_execution ON pending_actions(execution_id, status)",
            [],
        )?;
        db.execute(
            "CREATE INDEX IF NOT EXISTS idx_decision_log_execution_id ON decision_log(execution_id, id)",
            [],
        )?;

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }
}
