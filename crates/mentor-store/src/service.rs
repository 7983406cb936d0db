//! Async coordination layer over the git repositories and the pending-diff
//! index.
//!
//! All git work runs in `spawn_blocking`. Every operation on a user's
//! repository holds that user's exclusive lock, so concurrent requests for
//! the same user serialize while distinct users proceed in parallel.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use mentor_core::types::Confidence;
use mentor_core::{MentorError, Result};
use tokio::sync::Mutex;
use tracing::info;

use crate::diffs::{DiffOperation, DiffStatus, PendingDiff, PendingDiffStore};
use crate::frontmatter::{get_str, parse_front_matter};
use crate::repo::{RepoError, UserRepo};
use crate::types::{MemoryBlock, ProposalDiff, ProposalEnvelope, ProposalInfo, VersionInfo};

pub struct BlockService {
    users_dir: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl BlockService {
    /// `data_root` is the configured storage root; users live under
    /// `{data_root}/users/`.
    pub fn new(data_root: impl AsRef<Path>) -> Self {
        Self {
            users_dir: data_root.as_ref().join("users"),
            locks: DashMap::new(),
        }
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn repo(&self, user_id: &str) -> UserRepo {
        UserRepo::new(user_id, &self.users_dir)
    }

    fn diff_store(&self, user_id: &str) -> Result<PendingDiffStore> {
        PendingDiffStore::new(self.repo(user_id).diffs_dir())
            .map_err(|e| MentorError::Internal(e.to_string()))
    }

    /// Initialize storage for a user. Idempotent.
    pub async fn init_user(&self, user_id: &str) -> Result<()> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        run_blocking(move || repo.init()).await
    }

    pub async fn user_exists(&self, user_id: &str) -> bool {
        self.repo(user_id).exists()
    }

    /// All user ids with initialized storage.
    pub fn list_users(&self) -> Result<Vec<String>> {
        if !self.users_dir.exists() {
            return Ok(Vec::new());
        }
        let mut users = Vec::new();
        let entries =
            std::fs::read_dir(&self.users_dir).map_err(|e| MentorError::Internal(e.to_string()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() && path.join(".git").exists() {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    users.push(name.to_string());
                }
            }
        }
        users.sort();
        Ok(users)
    }

    /// All blocks for a user, parsed from `main`.
    pub async fn list_blocks(&self, user_id: &str) -> Result<Vec<MemoryBlock>> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let uid = user_id.to_string();
        run_blocking(move || {
            let mut blocks = Vec::new();
            for label in repo.list_blocks()? {
                if let Some(content) = repo.read_block(&label)? {
                    blocks.push(parse_block(&uid, &label, &content));
                }
            }
            Ok(blocks)
        })
        .await
    }

    pub async fn get_block(&self, user_id: &str, label: &str) -> Result<Option<MemoryBlock>> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let uid = user_id.to_string();
        let label = label.to_string();
        run_blocking(move || Ok(repo.read_block(&label)?.map(|c| parse_block(&uid, &label, &c)))).await
    }

    /// Direct write on `main`. Returns the commit SHA.
    #[allow(clippy::too_many_arguments)]
    pub async fn write_block(
        &self,
        user_id: &str,
        label: &str,
        content: &str,
        message: Option<&str>,
        author: &str,
        schema: Option<&str>,
        title: Option<&str>,
    ) -> Result<String> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let (label, content) = (label.to_string(), content.to_string());
        let message = message.map(str::to_string);
        let author = author.to_string();
        let schema = schema.map(str::to_string);
        let title = title.map(str::to_string);
        run_blocking(move || {
            repo.init()?;
            repo.write_block(
                &label,
                &content,
                message.as_deref(),
                &author,
                schema.as_deref(),
                title.as_deref(),
            )
        })
        .await
    }

    pub async fn delete_block(&self, user_id: &str, label: &str, author: &str) -> Result<Option<String>> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let (label, author) = (label.to_string(), author.to_string());
        run_blocking(move || repo.delete_block(&label, &author)).await
    }

    pub async fn get_history(&self, user_id: &str, label: &str, limit: usize) -> Result<Vec<VersionInfo>> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let label = label.to_string();
        run_blocking(move || repo.get_block_history(&label, limit)).await
    }

    pub async fn get_block_at_version(
        &self,
        user_id: &str,
        label: &str,
        commit_sha: &str,
    ) -> Result<Option<MemoryBlock>> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let uid = user_id.to_string();
        let (label, sha) = (label.to_string(), commit_sha.to_string());
        run_blocking(move || {
            Ok(repo
                .get_block_at_version(&label, &sha)?
                .map(|c| parse_block(&uid, &label, &c)))
        })
        .await
    }

    pub async fn restore_block(&self, user_id: &str, label: &str, commit_sha: &str) -> Result<String> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let (label, sha) = (label.to_string(), commit_sha.to_string());
        run_blocking(move || repo.restore_block(&label, &sha)).await
    }

    // ── Proposals ───────────────────────────────────────────────────────────

    /// Record an agent proposal: a commit on the proposal branch plus a
    /// pending-diff record. Returns the saved diff.
    #[allow(clippy::too_many_arguments)]
    pub async fn propose_edit(
        &self,
        user_id: &str,
        label: &str,
        new_body: &str,
        agent_id: &str,
        reasoning: &str,
        confidence: Confidence,
        operation: DiffOperation,
        source_query: Option<String>,
    ) -> Result<PendingDiff> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let store = self.diff_store(user_id)?;

        let envelope = ProposalEnvelope {
            agent_id: agent_id.to_string(),
            reasoning: reasoning.to_string(),
            confidence,
            block_label: label.to_string(),
            user_id: user_id.to_string(),
        };
        let (uid, label_owned, body) = (user_id.to_string(), label.to_string(), new_body.to_string());
        let (agent, reason) = (agent_id.to_string(), reasoning.to_string());

        let (current_body, _branch) = run_blocking(move || {
            let current = repo
                .read_block(&label_owned)?
                .ok_or_else(|| RepoError::BlockNotFound(label_owned.clone()))?;
            let (_, current_body) = parse_front_matter(&current);
            let branch = repo.create_proposal(&label_owned, &body, &envelope)?;
            Ok((current_body, branch))
        })
        .await?;

        let diff = PendingDiff::create(
            &uid,
            &agent,
            label,
            operation,
            current_body,
            new_body.to_string(),
            &reason,
            confidence,
            source_query,
        );
        store
            .save(&diff)
            .map_err(|e| MentorError::Internal(e.to_string()))?;

        info!(user_id = %uid, block = %label, diff_id = %diff.id, agent = %agent, "edit proposed");
        Ok(diff)
    }

    pub async fn list_proposals(&self, user_id: &str) -> Result<Vec<ProposalInfo>> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        run_blocking(move || repo.list_proposals()).await
    }

    /// The active proposal content diff for a block, paired with the latest
    /// pending diff record when one exists.
    pub async fn get_proposal_diff(
        &self,
        user_id: &str,
        label: &str,
    ) -> Result<Option<(ProposalDiff, Option<PendingDiff>)>> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let repo = self.repo(user_id);
        let store = self.diff_store(user_id)?;
        let label_owned = label.to_string();
        let diff = run_blocking(move || repo.get_proposal_diff(&label_owned)).await?;
        Ok(diff.map(|d| {
            let record = store.list_pending(Some(label)).into_iter().next();
            (d, record)
        }))
    }

    /// Approve a pending diff: merge the branch into `main`, stamp the
    /// record, supersede every other pending diff on the block.
    pub async fn approve_diff(&self, user_id: &str, label: &str, diff_id: &str) -> Result<String> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let store = self.diff_store(user_id)?;
        let diff = store
            .get(diff_id)
            .filter(|d| d.block_label == label)
            .ok_or_else(|| MentorError::DiffNotFound { id: diff_id.to_string() })?;
        if diff.status != DiffStatus::Pending {
            return Err(MentorError::ProposalStale {
                status: diff.status.to_string(),
            });
        }

        let repo = self.repo(user_id);
        let label_owned = label.to_string();
        let sha = run_blocking(move || repo.approve_proposal(&label_owned)).await?;

        store
            .update_status(diff_id, DiffStatus::Approved, Some(&sha))
            .map_err(|e| MentorError::Internal(e.to_string()))?;
        let superseded = store
            .supersede_older(label, diff_id)
            .map_err(|e| MentorError::Internal(e.to_string()))?;

        info!(
            user_id = %user_id,
            block = %label,
            diff_id = %diff_id,
            superseded,
            "diff approved"
        );
        Ok(sha)
    }

    /// Reject a pending diff: delete the branch, stamp the record. Returns
    /// whether a branch existed.
    pub async fn reject_diff(&self, user_id: &str, label: &str, diff_id: &str) -> Result<bool> {
        let _guard = self.lock_for(user_id).lock_owned().await;
        let store = self.diff_store(user_id)?;
        let diff = store
            .get(diff_id)
            .filter(|d| d.block_label == label)
            .ok_or_else(|| MentorError::DiffNotFound { id: diff_id.to_string() })?;
        if diff.status != DiffStatus::Pending {
            return Err(MentorError::ProposalStale {
                status: diff.status.to_string(),
            });
        }

        let repo = self.repo(user_id);
        let label_owned = label.to_string();
        let existed = run_blocking(move || repo.reject_proposal(&label_owned)).await?;

        store
            .update_status(diff_id, DiffStatus::Rejected, None)
            .map_err(|e| MentorError::Internal(e.to_string()))?;

        info!(user_id = %user_id, block = %label, diff_id = %diff_id, "diff rejected");
        Ok(existed)
    }

    pub fn pending_counts(&self, user_id: &str) -> Result<HashMap<String, usize>> {
        Ok(self.diff_store(user_id)?.count_pending())
    }
}

/// Parse raw block file content into the API shape.
fn parse_block(user_id: &str, label: &str, content: &str) -> MemoryBlock {
    let (meta, body) = parse_front_matter(content);
    MemoryBlock {
        user_id: user_id.to_string(),
        label: label.to_string(),
        title: get_str(&meta, "title"),
        schema_ref: get_str(&meta, "schema"),
        body,
        updated_at: get_str(&meta, "updated_at"),
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> std::result::Result<T, RepoError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| MentorError::Internal(format!("blocking task failed: {e}")))?
        .map_err(map_repo_err)
}

fn map_repo_err(err: RepoError) -> MentorError {
    match err {
        RepoError::BlockNotFound(label) => MentorError::BlockNotFound { label },
        RepoError::VersionNotFound { label, sha } => MentorError::VersionNotFound { label, sha },
        RepoError::ProposalMissing(label) => MentorError::DiffNotFound { id: label },
        RepoError::MergeConflict(label) => MentorError::ProposalConflict(label),
        RepoError::Git(e) => MentorError::Internal(format!("git: {e}")),
        RepoError::Io(e) => MentorError::Internal(format!("io: {e}")),
    }
}
