use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What causes a task to fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// Fire on a cron schedule.
    Cron { schedule: String },
    /// Fire for users idle at least `idle_minutes`, at most once per
    /// `cooldown_minutes` per user.
    Idle {
        idle_minutes: u32,
        #[serde(default = "default_cooldown")]
        cooldown_minutes: u32,
    },
}

fn default_cooldown() -> u32 {
    60
}

/// How a specific run was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Cron,
    Idle,
    Manual,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerType::Cron => "cron",
            TriggerType::Idle => "idle",
            TriggerType::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cron" => Ok(TriggerType::Cron),
            "idle" => Ok(TriggerType::Idle),
            "manual" => Ok(TriggerType::Manual),
            other => Err(format!("unknown trigger type: {other}")),
        }
    }
}

/// A registered background task definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackgroundTask {
    pub name: String,
    pub system_prompt: String,
    /// Tool group ids instantiated per user (e.g. "memory", "dialectic").
    pub tools: Vec<String>,
    /// Block labels included in the task's memory context.
    pub memory_blocks: Vec<String>,
    pub trigger: Trigger,
    pub user_ids: Vec<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_batch_size() -> usize {
    5
}

fn default_max_turns() -> usize {
    10
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Partial,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Partial => "partial",
            RunStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "partial" => Ok(RunStatus::Partial),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status: {other}")),
        }
    }
}

/// Outcome of a task run for one user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRunResult {
    pub user_id: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub turns_used: usize,
    pub error: Option<String>,
    #[serde(default)]
    pub proposals_created: usize,
}

/// One execution of a background task across its user cohort.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub task_name: String,
    pub trigger_type: TriggerType,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub user_results: Vec<UserRunResult>,
    pub error: Option<String>,
}
