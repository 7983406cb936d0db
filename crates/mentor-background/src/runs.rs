//! Durable task-run history.

use std::str::FromStr;
use std::sync::Mutex;

use mentor_core::{MentorError, Result};
use rusqlite::Connection;

use crate::db::init_db;
use crate::types::{RunStatus, TaskRun, TriggerType, UserRunResult};

pub struct TaskRunStore {
    db: Mutex<Connection>,
}

impl TaskRunStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn).map_err(db_err)?;
        Ok(Self { db: Mutex::new(conn) })
    }

    pub fn create_run(&self, run: &TaskRun) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO task_runs
             (id, task_name, trigger_type, status, started_at, completed_at, user_results, error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            rusqlite::params![
                run.id,
                run.task_name,
                run.trigger_type.to_string(),
                run.status.to_string(),
                run.started_at.to_rfc3339(),
                run.completed_at.map(|t| t.to_rfc3339()),
                results_json(&run.user_results)?,
                run.error,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn update_run(&self, run: &TaskRun) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "UPDATE task_runs
             SET status = ?2, completed_at = ?3, user_results = ?4, error = ?5
             WHERE id = ?1",
            rusqlite::params![
                run.id,
                run.status.to_string(),
                run.completed_at.map(|t| t.to_rfc3339()),
                results_json(&run.user_results)?,
                run.error,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_run(&self, id: &str) -> Result<Option<TaskRun>> {
        let db = self.db.lock().unwrap();
        let run = db
            .query_row(
                "SELECT id, task_name, trigger_type, status, started_at,
                        completed_at, user_results, error
                 FROM task_runs WHERE id = ?1",
                [id],
                row_to_run,
            )
            .ok();
        Ok(run)
    }

    /// Run history for a task, newest first.
    pub fn list_runs(&self, task_name: &str, limit: usize) -> Result<Vec<TaskRun>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db
            .prepare(
                "SELECT id, task_name, trigger_type, status, started_at,
                        completed_at, user_results, error
                 FROM task_runs
                 WHERE task_name = ?1
                 ORDER BY started_at DESC
                 LIMIT ?2",
            )
            .map_err(db_err)?;
        let runs = stmt
            .query_map(rusqlite::params![task_name, limit], row_to_run)
            .map_err(db_err)?
            .filter_map(|r| r.ok())
            .collect();
        Ok(runs)
    }
}

fn results_json(results: &[UserRunResult]) -> Result<String> {
    serde_json::to_string(results).map_err(|e| MentorError::Internal(e.to_string()))
}

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<TaskRun> {
    let trigger_str: String = row.get(2)?;
    let status_str: String = row.get(3)?;
    let started_str: String = row.get(4)?;
    let completed_str: Option<String> = row.get(5)?;
    let results_str: String = row.get(6)?;

    Ok(TaskRun {
        id: row.get(0)?,
        task_name: row.get(1)?,
        trigger_type: TriggerType::from_str(&trigger_str).unwrap_or(TriggerType::Manual),
        status: RunStatus::from_str(&status_str).unwrap_or(RunStatus::Failed),
        started_at: parse_ts(&started_str),
        completed_at: completed_str.as_deref().map(parse_ts),
        user_results: serde_json::from_str(&results_str).unwrap_or_default(),
        error: row.get(7)?,
    })
}

fn parse_ts(s: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now())
}

fn db_err(e: rusqlite::Error) -> MentorError {
    MentorError::Internal(format!("task run db: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_store() -> TaskRunStore {
        TaskRunStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    fn make_run(id: &str, task: &str) -> TaskRun {
        TaskRun {
            id: id.to_string(),
            task_name: task.to_string(),
            trigger_type: TriggerType::Cron,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            user_results: Vec::new(),
            error: None,
        }
    }

    #[test]
    fn create_update_get_round_trip() {
        let store = make_store();
        let mut run = make_run("r1", "t1");
        store.create_run(&run).unwrap();

        run.status = RunStatus::Success;
        run.completed_at = Some(Utc::now());
        run.user_results.push(UserRunResult {
            user_id: "u1".to_string(),
            status: RunStatus::Success,
            started_at: Utc::now(),
            completed_at: Some(Utc::now()),
            turns_used: 4,
            error: None,
            proposals_created: 1,
        });
        store.update_run(&run).unwrap();

        let loaded = store.get_run("r1").unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Success);
        assert_eq!(loaded.user_results.len(), 1);
        assert_eq!(loaded.user_results[0].turns_used, 4);
        assert!(store.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn list_runs_is_scoped_and_bounded() {
        let store = make_store();
        store.create_run(&make_run("r1", "t1")).unwrap();
        store.create_run(&make_run("r2", "t1")).unwrap();
        store.create_run(&make_run("r3", "other")).unwrap();

        let runs = store.list_runs("t1", 10).unwrap();
        assert_eq!(runs.len(), 2);
        let runs = store.list_runs("t1", 1).unwrap();
        assert_eq!(runs.len(), 1);
    }
}
