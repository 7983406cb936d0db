//! Per-user activity clock and the idle/cooldown query.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use mentor_core::{MentorError, Result};
use rusqlite::Connection;
use tracing::debug;

use crate::db::init_db;

/// Records `last_active_at` per user and the cooldown ledger of background
/// task runs. Thread-safe: the SQLite connection sits behind a mutex.
pub struct ActivityTracker {
    db: Mutex<Connection>,
}

impl ActivityTracker {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn).map_err(db_err)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    /// Upsert a user's activity timestamp.
    pub fn update_user_activity(&self, user_id: &str, ts: DateTime<Utc>) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO user_activity (user_id, last_active_at) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET last_active_at = ?2",
            rusqlite::params![user_id, ts.to_rfc3339()],
        )
        .map_err(db_err)?;
        debug!(user_id, "activity stamped");
        Ok(())
    }

    pub fn get_last_active(&self, user_id: &str) -> Result<Option<DateTime<Utc>>> {
        let db = self.db.lock().unwrap();
        let ts: Option<String> = db
            .query_row(
                "SELECT last_active_at FROM user_activity WHERE user_id = ?1",
                [user_id],
                |row| row.get(0),
            )
            .ok();
        Ok(ts.and_then(|s| DateTime::parse_from_rfc3339(&s).ok().map(|d| d.with_timezone(&Utc))))
    }

    /// Record that `task_name` ran for `user_id` at `ran_at` — the write side
    /// of the cooldown ledger.
    pub fn record_task_run_for_user(
        &self,
        user_id: &str,
        task_name: &str,
        ran_at: DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO task_user_runs (user_id, task_name, ran_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(user_id, task_name) DO UPDATE SET ran_at = ?3",
            rusqlite::params![user_id, task_name, ran_at.to_rfc3339()],
        )
        .map_err(db_err)?;
        Ok(())
    }

    /// Users idle for at least `idle_minutes` whose last run of `task_name`
    /// is absent or older than `cooldown_minutes`. Single atomic query.
    pub fn get_users_idle_for(
        &self,
        idle_minutes: u32,
        task_name: &str,
        cooldown_minutes: u32,
    ) -> Result<Vec<String>> {
        let now = Utc::now();
        let idle_cutoff = (now - Duration::minutes(idle_minutes as i64)).to_rfc3339();
        let cooldown_cutoff = (now - Duration::minutes(cooldown_minutes as i64)).to_rfc3339();

        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT a.user_id FROM user_activity a
                 LEFT JOIN task_user_runs r
                   ON r.user_id = a.user_id AND r.task_name = ?1
                 WHERE a.last_active_at <= ?2
                   AND (r.ran_at IS NULL OR r.ran_at <= ?3)
                 ORDER BY a.user_id",
            )
            .map_err(db_err)?;
        let users = stmt
            .query_map(
                rusqlite::params![task_name, idle_cutoff, cooldown_cutoff],
                |row| row.get::<_, String>(0),
            )
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(users)
    }
}

fn db_err(e: rusqlite::Error) -> MentorError {
    MentorError::Internal(format!("activity db: {e}"))
}
