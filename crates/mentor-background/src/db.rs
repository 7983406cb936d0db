use rusqlite::{Connection, Result};

/// Initialise background-task tables. Safe to call on every startup
/// (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_tasks_table(conn)?;
    create_runs_table(conn)?;
    Ok(())
}

/// Task definitions persist as JSON documents keyed by name; the registry
/// keeps the decoded copies in memory.
fn create_tasks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS background_tasks (
            name       TEXT PRIMARY KEY NOT NULL,
            definition TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );",
    )
}

fn create_runs_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS task_runs (
            id           TEXT PRIMARY KEY NOT NULL,
            task_name    TEXT NOT NULL,
            trigger_type TEXT NOT NULL,
            status       TEXT NOT NULL,
            started_at   TEXT NOT NULL,
            completed_at TEXT,
            user_results TEXT NOT NULL DEFAULT '[]',  -- JSON array
            error        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_task
            ON task_runs(task_name, started_at DESC);",
    )
}
