use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Index entry for one workspace file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub path: String,
    /// `sha256:<hex>` content hash.
    pub hash: String,
    pub size: u64,
    /// ISO-8601 modification time.
    pub modified: String,
    /// Where the file came from ("mentor" for locally written files).
    #[serde(default = "default_source")]
    pub source: String,
    /// Assigned by the knowledge-base sync collaborator, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openwebui_file_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<String>,
}

fn default_source() -> String {
    "mentor".to_string()
}

/// The `.sync_state.json` document at the workspace root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub user_id: String,
    /// Relative path → metadata. BTreeMap keeps the file deterministic.
    #[serde(default)]
    pub files: BTreeMap<String, FileMetadata>,
}

/// API response shape for the workspace file listing.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceIndex {
    pub user_id: String,
    pub files: Vec<FileMetadata>,
    pub total_size: u64,
}
