//! Out-of-band pending-diff records for agent-proposed edits.
//!
//! One JSON document per diff at `{user_dir}/pending_diffs/{id}.json`. The
//! index is the source of truth for which diffs exist and in what lifecycle
//! state; the proposal branch is the source of truth for content.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use mentor_core::types::Confidence;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// The edit shape the proposing agent asked for. Recorded for audit; the
/// applied change is always a full-body replace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffOperation {
    Append,
    Replace,
    LlmDiff,
    FullReplace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffStatus {
    Pending,
    Approved,
    Rejected,
    Superseded,
    Expired,
}

impl std::fmt::Display for DiffStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiffStatus::Pending => "pending",
            DiffStatus::Approved => "approved",
            DiffStatus::Rejected => "rejected",
            DiffStatus::Superseded => "superseded",
            DiffStatus::Expired => "expired",
        };
        write!(f, "{s}")
    }
}

/// A proposed change from an agent awaiting human decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingDiff {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub block_label: String,
    pub field: Option<String>,
    pub operation: DiffOperation,
    pub current_value: String,
    pub proposed_value: String,
    pub reasoning: String,
    pub confidence: Confidence,
    pub source_query: Option<String>,
    pub status: DiffStatus,
    /// ISO-8601 creation timestamp.
    pub created_at: String,
    pub reviewed_at: Option<String>,
    pub applied_commit: Option<String>,
}

impl PendingDiff {
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        user_id: &str,
        agent_id: &str,
        block_label: &str,
        operation: DiffOperation,
        current_value: String,
        proposed_value: String,
        reasoning: &str,
        confidence: Confidence,
        source_query: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            block_label: block_label.to_string(),
            field: None,
            operation,
            current_value,
            proposed_value,
            reasoning: reasoning.to_string(),
            confidence,
            source_query,
            status: DiffStatus::Pending,
            created_at: Utc::now().to_rfc3339(),
            reviewed_at: None,
            applied_commit: None,
        }
    }
}

/// JSON-file store for pending diffs under one user directory.
pub struct PendingDiffStore {
    diffs_dir: PathBuf,
}

impl PendingDiffStore {
    pub fn new(diffs_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let diffs_dir = diffs_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&diffs_dir)?;
        Ok(Self { diffs_dir })
    }

    fn diff_path(&self, id: &str) -> PathBuf {
        self.diffs_dir.join(format!("{id}.json"))
    }

    pub fn save(&self, diff: &PendingDiff) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(diff)?;
        std::fs::write(self.diff_path(&diff.id), json)
    }

    pub fn get(&self, id: &str) -> Option<PendingDiff> {
        let data = std::fs::read_to_string(self.diff_path(id)).ok()?;
        serde_json::from_str(&data).ok()
    }

    /// All diffs regardless of status, unsorted.
    fn load_all(&self) -> Vec<PendingDiff> {
        let Ok(entries) = std::fs::read_dir(&self.diffs_dir) else {
            return Vec::new();
        };
        entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .filter_map(|e| {
                let data = std::fs::read_to_string(e.path()).ok()?;
                match serde_json::from_str(&data) {
                    Ok(diff) => Some(diff),
                    Err(_) => {
                        debug!(path = %e.path().display(), "skipping unparseable diff record");
                        None
                    }
                }
            })
            .collect()
    }

    /// Still-pending diffs, optionally filtered by block, newest first.
    pub fn list_pending(&self, block_label: Option<&str>) -> Vec<PendingDiff> {
        let mut diffs: Vec<PendingDiff> = self
            .load_all()
            .into_iter()
            .filter(|d| d.status == DiffStatus::Pending)
            .filter(|d| block_label.is_none_or(|l| d.block_label == l))
            .collect();
        diffs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        diffs
    }

    /// Pending count per block label.
    pub fn count_pending(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for diff in self.list_pending(None) {
            *counts.entry(diff.block_label).or_insert(0) += 1;
        }
        counts
    }

    /// Stamp a new status (and optionally the applied commit) on a diff.
    pub fn update_status(
        &self,
        id: &str,
        status: DiffStatus,
        applied_commit: Option<&str>,
    ) -> std::io::Result<bool> {
        let Some(mut diff) = self.get(id) else {
            return Ok(false);
        };
        diff.status = status;
        diff.reviewed_at = Some(Utc::now().to_rfc3339());
        if let Some(sha) = applied_commit {
            diff.applied_commit = Some(sha.to_string());
        }
        self.save(&diff)?;
        Ok(true)
    }

    /// Mark every other pending diff on a block as superseded. Returns how
    /// many were transitioned.
    pub fn supersede_older(&self, block_label: &str, keep_id: &str) -> std::io::Result<usize> {
        let mut count = 0;
        for diff in self.list_pending(Some(block_label)) {
            if diff.id != keep_id {
                self.update_status(&diff.id, DiffStatus::Superseded, None)?;
                count += 1;
            }
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, PendingDiffStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = PendingDiffStore::new(dir.path().join("pending_diffs")).expect("store");
        (dir, store)
    }

    fn make_diff(block: &str) -> PendingDiff {
        PendingDiff::create(
            "u1",
            "curator",
            block,
            DiffOperation::Replace,
            "old".to_string(),
            "new".to_string(),
            "because",
            Confidence::Medium,
            None,
        )
    }

    #[test]
    fn save_and_get_round_trip() {
        let (_dir, store) = make_store();
        let diff = make_diff("student");
        store.save(&diff).unwrap();

        let loaded = store.get(&diff.id).expect("present");
        assert_eq!(loaded.block_label, "student");
        assert_eq!(loaded.status, DiffStatus::Pending);
        assert!(loaded.reviewed_at.is_none());
    }

    #[test]
    fn list_pending_filters_by_block_and_status() {
        let (_dir, store) = make_store();
        let a = make_diff("student");
        let b = make_diff("goals");
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        store.update_status(&b.id, DiffStatus::Rejected, None).unwrap();

        assert_eq!(store.list_pending(None).len(), 1);
        assert_eq!(store.list_pending(Some("student")).len(), 1);
        assert!(store.list_pending(Some("goals")).is_empty());
    }

    #[test]
    fn approve_stamps_commit_and_review_time() {
        let (_dir, store) = make_store();
        let diff = make_diff("student");
        store.save(&diff).unwrap();
        store
            .update_status(&diff.id, DiffStatus::Approved, Some("abc123"))
            .unwrap();

        let loaded = store.get(&diff.id).unwrap();
        assert_eq!(loaded.status, DiffStatus::Approved);
        assert_eq!(loaded.applied_commit.as_deref(), Some("abc123"));
        assert!(loaded.reviewed_at.is_some());
    }

    #[test]
    fn supersede_older_keeps_the_named_diff() {
        let (_dir, store) = make_store();
        let keep = make_diff("student");
        let older1 = make_diff("student");
        let older2 = make_diff("student");
        let other_block = make_diff("goals");
        for d in [&keep, &older1, &older2, &other_block] {
            store.save(d).unwrap();
        }

        let count = store.supersede_older("student", &keep.id).unwrap();
        assert_eq!(count, 2);
        assert_eq!(store.get(&keep.id).unwrap().status, DiffStatus::Pending);
        assert_eq!(store.get(&older1.id).unwrap().status, DiffStatus::Superseded);
        assert_eq!(store.get(&other_block.id).unwrap().status, DiffStatus::Pending);
    }

    #[test]
    fn count_pending_groups_by_block() {
        let (_dir, store) = make_store();
        store.save(&make_diff("student")).unwrap();
        store.save(&make_diff("student")).unwrap();
        store.save(&make_diff("goals")).unwrap();

        let counts = store.count_pending();
        assert_eq!(counts.get("student"), Some(&2));
        assert_eq!(counts.get("goals"), Some(&1));
    }
}
