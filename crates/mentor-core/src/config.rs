use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8200;
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Workspace files larger than this are rejected on write.
pub const DEFAULT_MAX_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Top-level config (mentor.toml + MENTOR_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MentorConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub conversation_store: ConversationStoreConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

impl Default for MentorConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            storage: StorageConfig::default(),
            workspace: WorkspaceConfig::default(),
            llm: LlmConfig::default(),
            conversation_store: ConversationStoreConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl MentorConfig {
    /// Load config: explicit path > MENTOR_CONFIG env > ./mentor.toml,
    /// then MENTOR_* environment overrides on top.
    pub fn load(path: Option<&str>) -> Result<Self, figment::Error> {
        let file = path
            .map(str::to_string)
            .or_else(|| std::env::var("MENTOR_CONFIG").ok())
            .unwrap_or_else(|| "mentor.toml".to_string());

        Figment::new()
            .merge(Toml::file(file))
            .merge(Env::prefixed("MENTOR_").split("__"))
            .extract()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: DEFAULT_BIND.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Base path for per-user storage: `{data_root}/users/{user_id}/`.
    #[serde(default = "default_data_root")]
    pub data_root: String,
    /// SQLite database for activity, background tasks, and run history.
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            db_path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WorkspaceConfig {
    /// When set, all users share one workspace at this path instead of
    /// per-user `workspace/` directories.
    pub shared_path: Option<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            api_key: String::new(),
            timeout_seconds: default_llm_timeout(),
            max_tokens: default_max_tokens(),
        }
    }
}

/// External collaborator for conversation-history persistence and dialectic
/// queries. Optional — when `endpoint` is unset, persistence is a no-op and
/// the dialectic tool reports itself unavailable.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ConversationStoreConfig {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_tick_seconds")]
    pub tick_seconds: u64,
    /// Global cap on concurrently-running task dispatches.
    #[serde(default = "default_max_dispatches")]
    pub max_concurrent_dispatches: usize,
    /// Grace period for in-flight dispatches on shutdown.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_seconds: default_tick_seconds(),
            max_concurrent_dispatches: default_max_dispatches(),
            shutdown_grace_seconds: default_shutdown_grace(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_data_root() -> String {
    "./data".to_string()
}

fn default_db_path() -> String {
    "./data/mentor.db".to_string()
}

fn default_max_file_bytes() -> u64 {
    DEFAULT_MAX_FILE_BYTES
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_llm_timeout() -> u64 {
    120
}

fn default_max_tokens() -> u32 {
    8192
}

fn default_tick_seconds() -> u64 {
    60
}

fn default_max_dispatches() -> usize {
    8
}

fn default_shutdown_grace() -> u64 {
    30
}
