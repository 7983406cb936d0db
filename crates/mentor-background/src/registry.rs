//! Task registry — in-memory map of task definitions with durable
//! persistence. Registration is an upsert; the scheduler reads a snapshot
//! per tick.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use mentor_core::{MentorError, Result};
use rusqlite::Connection;
use tracing::{info, warn};

use crate::db::init_db;
use crate::types::{BackgroundTask, Trigger};

pub struct TaskRegistry {
    db: Mutex<Connection>,
    tasks: RwLock<HashMap<String, BackgroundTask>>,
}

impl TaskRegistry {
    /// Open the registry, loading persisted definitions into memory.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn).map_err(db_err)?;

        let mut tasks = HashMap::new();
        {
            let mut stmt = conn
                .prepare("SELECT name, definition FROM background_tasks")
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })
                .map_err(db_err)?;
            for row in rows.filter_map(|r| r.ok()) {
                let (name, definition) = row;
                match serde_json::from_str::<BackgroundTask>(&definition) {
                    Ok(task) => {
                        tasks.insert(name, task);
                    }
                    Err(e) => {
                        warn!(task = %name, error = %e, "skipping unparseable task definition");
                    }
                }
            }
        }
        info!(count = tasks.len(), "task registry loaded");

        Ok(Self {
            db: Mutex::new(conn),
            tasks: RwLock::new(tasks),
        })
    }

    /// Register or replace a task definition.
    pub fn register(&self, task: BackgroundTask) -> Result<()> {
        let definition = serde_json::to_string(&task)
            .map_err(|e| MentorError::Internal(e.to_string()))?;
        let now = Utc::now().to_rfc3339();

        {
            let db = self.db.lock().unwrap();
            db.execute(
                "INSERT INTO background_tasks (name, definition, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(name) DO UPDATE SET definition = ?2, updated_at = ?3",
                rusqlite::params![task.name, definition, now],
            )
            .map_err(db_err)?;
        }

        info!(task = %task.name, "task registered");
        self.tasks.write().unwrap().insert(task.name.clone(), task);
        Ok(())
    }

    /// Remove a task. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> Result<bool> {
        let removed = {
            let db = self.db.lock().unwrap();
            db.execute("DELETE FROM background_tasks WHERE name = ?1", [name])
                .map_err(db_err)?
        };
        self.tasks.write().unwrap().remove(name);
        if removed > 0 {
            info!(task = %name, "task unregistered");
        }
        Ok(removed > 0)
    }

    /// Flip a task's enabled flag. Returns whether the task exists.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> Result<bool> {
        let updated = {
            let mut tasks = self.tasks.write().unwrap();
            match tasks.get_mut(name) {
                Some(task) => {
                    task.enabled = enabled;
                    Some(task.clone())
                }
                None => None,
            }
        };
        match updated {
            Some(task) => {
                self.register(task)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get(&self, name: &str) -> Option<BackgroundTask> {
        self.tasks.read().unwrap().get(name).cloned()
    }

    pub fn list_all(&self) -> Vec<BackgroundTask> {
        let mut all: Vec<BackgroundTask> = self.tasks.read().unwrap().values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    /// Enabled cron-triggered tasks, for the scheduler's tick snapshot.
    pub fn list_cron_tasks(&self) -> Vec<BackgroundTask> {
        self.list_all()
            .into_iter()
            .filter(|t| t.enabled && matches!(t.trigger, Trigger::Cron { .. }))
            .collect()
    }

    /// Enabled idle-triggered tasks, for the scheduler's tick snapshot.
    pub fn list_idle_tasks(&self) -> Vec<BackgroundTask> {
        self.list_all()
            .into_iter()
            .filter(|t| t.enabled && matches!(t.trigger, Trigger::Idle { .. }))
            .collect()
    }
}

fn db_err(e: rusqlite::Error) -> MentorError {
    MentorError::Internal(format!("task registry db: {e}"))
}
