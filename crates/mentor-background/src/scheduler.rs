//! The scheduler — a single cooperative loop over cron and idle triggers.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mentor_core::{MentorError, Result};
use mentor_memory::ActivityTracker;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

use crate::executor::TaskExecutor;
use crate::registry::TaskRegistry;
use crate::types::{BackgroundTask, TaskRun, Trigger, TriggerType};

pub struct Scheduler {
    registry: Arc<TaskRegistry>,
    executor: Arc<TaskExecutor>,
    activity: Arc<ActivityTracker>,
    tick_seconds: u64,
    shutdown_grace: Duration,
    /// Per-task bookkeeping for cron evaluation. A task never fires on the
    /// tick it is first seen.
    last_cron_check: Mutex<HashMap<String, DateTime<Utc>>>,
    /// Global cap on concurrently-running dispatches.
    dispatch_permits: Arc<Semaphore>,
    /// In-flight dispatches, awaited on shutdown.
    dispatches: TaskTracker,
    cancel: CancellationToken,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        executor: Arc<TaskExecutor>,
        activity: Arc<ActivityTracker>,
        tick_seconds: u64,
        max_concurrent_dispatches: usize,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            registry,
            executor,
            activity,
            tick_seconds,
            shutdown_grace,
            last_cron_check: Mutex::new(HashMap::new()),
            dispatch_permits: Arc::new(Semaphore::new(max_concurrent_dispatches.max(1))),
            dispatches: TaskTracker::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The loop. Runs until `shutdown` broadcasts true, then awaits
    /// in-flight dispatches with a bounded grace period before cancelling
    /// them.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(tick_seconds = self.tick_seconds, "scheduler started");
        let mut interval = tokio::time::interval(Duration::from_secs(self.tick_seconds.max(1)));
        // The immediate first tick only initializes cron bookkeeping.
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.check_triggers(Utc::now());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("scheduler stopping — draining in-flight dispatches");
        self.dispatches.close();
        if tokio::time::timeout(self.shutdown_grace, self.dispatches.wait())
            .await
            .is_err()
        {
            warn!("grace period elapsed — cancelling in-flight dispatches");
            self.cancel.cancel();
            self.dispatches.wait().await;
        }
        info!("scheduler stopped");
    }

    /// One tick: evaluate every enabled trigger against `now`.
    fn check_triggers(self: &Arc<Self>, now: DateTime<Utc>) {
        for task in self.registry.list_cron_tasks() {
            let Trigger::Cron { ref schedule } = task.trigger else {
                continue;
            };
            match self.cron_is_due(&task.name, schedule, now) {
                Ok(true) => {
                    info!(task = %task.name, "cron trigger fired");
                    self.dispatch(task, TriggerType::Cron, None);
                }
                Ok(false) => {}
                Err(e) => error!(task = %task.name, error = %e, "cron evaluation failed"),
            }
        }

        for task in self.registry.list_idle_tasks() {
            let Trigger::Idle {
                idle_minutes,
                cooldown_minutes,
            } = task.trigger
            else {
                continue;
            };

            let idle_users =
                match self
                    .activity
                    .get_users_idle_for(idle_minutes, &task.name, cooldown_minutes)
                {
                    Ok(users) => users,
                    Err(e) => {
                        error!(task = %task.name, error = %e, "idle query failed");
                        continue;
                    }
                };
            let eligible: Vec<String> = idle_users
                .into_iter()
                .filter(|u| task.user_ids.contains(u))
                .collect();

            if !eligible.is_empty() {
                info!(task = %task.name, user_count = eligible.len(), "idle trigger fired");
                self.dispatch(task, TriggerType::Idle, Some(eligible));
            }
        }
    }

    /// Evaluate one cron task and advance its bookkeeping.
    fn cron_is_due(&self, task_name: &str, schedule: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut checks = self.last_cron_check.lock().unwrap();
        cron_check(&mut checks, task_name, schedule, now)
    }

    /// Fire-and-track: the dispatch returns immediately; the run executes on
    /// the tracker under the global concurrency cap.
    fn dispatch(self: &Arc<Self>, task: BackgroundTask, trigger_type: TriggerType, user_ids: Option<Vec<String>>) {
        let scheduler = self.clone();
        self.dispatches.spawn(async move {
            let _permit = match scheduler.dispatch_permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // semaphore closed during shutdown
            };
            scheduler
                .executor
                .execute_task(&task, trigger_type, user_ids, scheduler.cancel.child_token())
                .await;
        });
    }

    /// Manual trigger: runs the task immediately and waits for completion.
    pub async fn run_task_now(&self, name: &str) -> Result<TaskRun> {
        let task = self
            .registry
            .get(name)
            .ok_or_else(|| MentorError::TaskNotFound {
                name: name.to_string(),
            })?;

        info!(task = %name, "manual trigger fired");
        Ok(self
            .executor
            .execute_task(&task, TriggerType::Manual, None, self.cancel.child_token())
            .await)
    }
}

/// Stateful cron evaluation against the bookkeeping map. A task seen for
/// the first time only initializes its `last_check` — it never fires on the
/// tick it is registered.
pub fn cron_check(
    checks: &mut HashMap<String, DateTime<Utc>>,
    task_name: &str,
    schedule: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(last_check) = checks.get(task_name).copied() else {
        checks.insert(task_name.to_string(), now);
        return Ok(false);
    };

    let due = cron_due(schedule, last_check, now)?;
    if due {
        checks.insert(task_name.to_string(), now);
    }
    Ok(due)
}

/// Whether `schedule` has a fire time in `(last_check, now]`.
///
/// Five-field expressions are accepted by prepending a seconds column.
pub fn cron_due(schedule: &str, last_check: DateTime<Utc>, now: DateTime<Utc>) -> Result<bool> {
    let normalized = if schedule.split_whitespace().count() == 5 {
        format!("0 {schedule}")
    } else {
        schedule.to_string()
    };
    let parsed = cron::Schedule::from_str(&normalized)
        .map_err(|e| MentorError::InvalidInput(format!("bad cron expression '{schedule}': {e}")))?;

    Ok(parsed
        .after(&last_check)
        .next()
        .is_some_and(|next| next <= now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    #[test]
    fn due_when_fire_time_passed_since_last_check() {
        // Daily at 06:00.
        assert!(cron_due("0 6 * * *", at(5, 59), at(6, 1)).unwrap());
        assert!(!cron_due("0 6 * * *", at(6, 1), at(6, 2)).unwrap());
    }

    #[test]
    fn not_due_when_next_fire_is_in_the_future() {
        assert!(!cron_due("0 6 * * *", at(6, 30), at(7, 0)).unwrap());
    }

    #[test]
    fn every_minute_fires_each_tick() {
        assert!(cron_due("* * * * *", at(6, 0), at(6, 1)).unwrap());
    }

    #[test]
    fn six_field_expressions_pass_through() {
        assert!(cron_due("0 0 6 * * *", at(5, 59), at(6, 1)).unwrap());
    }

    #[test]
    fn invalid_expression_is_an_error() {
        assert!(cron_due("not a cron", at(6, 0), at(6, 1)).is_err());
    }

    #[test]
    fn task_never_fires_on_first_sight() {
        let mut checks = HashMap::new();
        // Registered right at its fire time — only initializes bookkeeping.
        assert!(!cron_check(&mut checks, "t", "0 6 * * *", at(6, 0)).unwrap());
        // Next tick: the 06:00 fire already passed relative to last_check,
        // and `after` is exclusive, so nothing is due until tomorrow.
        assert!(!cron_check(&mut checks, "t", "0 6 * * *", at(6, 1)).unwrap());
    }

    #[test]
    fn fires_once_per_window_then_advances() {
        let mut checks = HashMap::new();
        assert!(!cron_check(&mut checks, "t", "0 6 * * *", at(5, 0)).unwrap());
        assert!(cron_check(&mut checks, "t", "0 6 * * *", at(6, 2)).unwrap());
        // Same window does not fire twice.
        assert!(!cron_check(&mut checks, "t", "0 6 * * *", at(6, 3)).unwrap());
    }
}
