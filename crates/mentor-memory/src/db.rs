use rusqlite::{Connection, Result};

/// Initialise activity tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_activity_table(conn)?;
    create_cooldown_table(conn)?;
    Ok(())
}

fn create_activity_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS user_activity (
            user_id        TEXT PRIMARY KEY NOT NULL,
            last_active_at TEXT NOT NULL
        );",
    )
}

/// Cooldown ledger: when did task T last run for user U. One row per pair;
/// the idle trigger reads it to keep tasks out of their cooldown window.
fn create_cooldown_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS task_user_runs (
            user_id   TEXT NOT NULL,
            task_name TEXT NOT NULL,
            ran_at    TEXT NOT NULL,
            PRIMARY KEY (user_id, task_name)
        );
        CREATE INDEX IF NOT EXISTS idx_task_runs_task
            ON task_user_runs(task_name, ran_at);",
    )
}
