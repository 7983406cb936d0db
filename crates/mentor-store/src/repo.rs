//! Low-level git operations for a single user's repository.
//!
//! Everything here is synchronous git2 work. [`crate::service::BlockService`]
//! wraps these calls in `spawn_blocking` and serializes mutations per user.
//!
//! The working tree always reflects `main`. Proposal commits are built with
//! tree builders directly against the branch ref, so a foreground reader can
//! never observe a half-switched checkout. The only operations that rewrite
//! the working tree are `main`-mutating ones, which run under the user lock.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::{build::CheckoutBuilder, BranchType, Commit, Oid, Repository, Signature, Sort};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::frontmatter::{default_title, format_front_matter, get_str, parse_front_matter};
use crate::types::{proposal_branch_name, ProposalDiff, ProposalEnvelope, ProposalInfo, VersionInfo};

const SYSTEM_NAME: &str = "Mentor System";
const SYSTEM_EMAIL: &str = "system@mentor.local";
const AGENT_EMAIL: &str = "agent@mentor.local";
const GITIGNORE: &str = "# Mentor user storage\n.sync_state.json\nworkspace/\n*.tmp\n";

/// Commit-message reasoning excerpt length for approval merges.
const REASONING_EXCERPT_CHARS: usize = 50;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("version {sha} not found for {label}")]
    VersionNotFound { label: String, sha: String },

    #[error("no proposal branch for block: {0}")]
    ProposalMissing(String),

    #[error("merge conflict on {0}")]
    MergeConflict(String),
}

/// Handle on one user's repository. Cheap to construct; the repository is
/// opened per operation.
#[derive(Debug, Clone)]
pub struct UserRepo {
    user_id: String,
    user_dir: PathBuf,
}

impl UserRepo {
    pub fn new(user_id: impl Into<String>, base_dir: impl AsRef<Path>) -> Self {
        let user_id = user_id.into();
        let user_dir = base_dir.as_ref().join(&user_id);
        Self { user_id, user_dir }
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    pub fn diffs_dir(&self) -> PathBuf {
        self.user_dir.join("pending_diffs")
    }

    fn blocks_dir(&self) -> PathBuf {
        self.user_dir.join("memory-blocks")
    }

    fn block_rel_path(label: &str) -> String {
        format!("memory-blocks/{label}.md")
    }

    pub fn exists(&self) -> bool {
        self.user_dir.join(".git").exists()
    }

    fn open(&self) -> Result<Repository, RepoError> {
        Ok(Repository::open(&self.user_dir)?)
    }

    /// Create the directory layout and repository. Idempotent: a no-op when
    /// `.git` already exists.
    pub fn init(&self) -> Result<(), RepoError> {
        if self.exists() {
            debug!(user_id = %self.user_id, "storage already initialized");
            return Ok(());
        }

        std::fs::create_dir_all(self.blocks_dir())?;
        std::fs::create_dir_all(self.diffs_dir())?;

        let repo = Repository::init(&self.user_dir)?;
        {
            let mut config = repo.config()?;
            config.set_str("user.name", SYSTEM_NAME)?;
            config.set_str("user.email", SYSTEM_EMAIL)?;
        }
        repo.set_head("refs/heads/main")?;

        std::fs::write(self.user_dir.join(".gitignore"), GITIGNORE)?;
        let mut index = repo.index()?;
        index.add_path(Path::new(".gitignore"))?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = system_signature()?;
        repo.commit(Some("HEAD"), &sig, &sig, "Initialize user storage", &tree, &[])?;

        info!(user_id = %self.user_id, "storage initialized");
        Ok(())
    }

    /// Labels of all blocks present on `main`.
    pub fn list_blocks(&self) -> Result<Vec<String>, RepoError> {
        let dir = self.blocks_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut labels = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|e| e == "md") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    labels.push(stem.to_string());
                }
            }
        }
        labels.sort();
        Ok(labels)
    }

    /// Full file content (front-matter included) of a block, or None.
    pub fn read_block(&self, label: &str) -> Result<Option<String>, RepoError> {
        let path = self.blocks_dir().join(format!("{label}.md"));
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(std::fs::read_to_string(path)?))
    }

    /// Write a block and commit it on `main`. Returns the commit SHA.
    ///
    /// Incoming front-matter is merged with server-injected fields; a title
    /// is derived from the label when nothing supplies one. Commits that
    /// would not change the tree are skipped (the head SHA is returned).
    #[allow(clippy::too_many_arguments)]
    pub fn write_block(
        &self,
        label: &str,
        content: &str,
        message: Option<&str>,
        author: &str,
        schema: Option<&str>,
        title: Option<&str>,
    ) -> Result<String, RepoError> {
        std::fs::create_dir_all(self.blocks_dir())?;

        let (existing_meta, parsed_body) = parse_front_matter(content);
        let body = if existing_meta.is_empty() {
            content.to_string()
        } else {
            parsed_body
        };

        let mut metadata = serde_yaml::Mapping::new();
        metadata.insert("block".into(), label.into());
        for (k, v) in &existing_meta {
            metadata.insert(k.clone(), v.clone());
        }
        metadata.insert("updated_at".into(), Utc::now().to_rfc3339().into());
        if let Some(schema) = schema {
            metadata.insert("schema".into(), schema.into());
        }
        if let Some(title) = title {
            metadata.insert("title".into(), title.into());
        } else if get_str(&metadata, "title").is_none() {
            metadata.insert("title".into(), default_title(label).into());
        }

        let full_content = format_front_matter(&metadata, &body);
        let path = self.blocks_dir().join(format!("{label}.md"));
        std::fs::write(&path, &full_content)?;

        let repo = self.open()?;
        let mut index = repo.index()?;
        index.add_path(Path::new(&Self::block_rel_path(label)))?;
        index.write()?;
        let tree_id = index.write_tree()?;

        let head = repo.head().ok().and_then(|h| h.peel_to_commit().ok());
        if let Some(ref parent) = head {
            if parent.tree_id() == tree_id {
                debug!(user_id = %self.user_id, block = %label, "skipping empty commit");
                return Ok(parent.id().to_string());
            }
        }

        let tree = repo.find_tree(tree_id)?;
        let sig = system_signature()?;
        let message = message
            .map(str::to_string)
            .unwrap_or_else(|| format!("Update {label} block"));
        let full_message = format!("{message}\n\nAuthor: {author}");
        let parents: Vec<&Commit> = head.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &full_message, &tree, &parents)?;

        info!(
            user_id = %self.user_id,
            block = %label,
            sha = %short_sha(&oid.to_string()),
            author = %author,
            "block committed"
        );
        Ok(oid.to_string())
    }

    /// Remove a block and commit the deletion. Returns None when the file
    /// was not present.
    pub fn delete_block(&self, label: &str, author: &str) -> Result<Option<String>, RepoError> {
        let path = self.blocks_dir().join(format!("{label}.md"));
        if !path.exists() {
            return Ok(None);
        }
        std::fs::remove_file(&path)?;

        let repo = self.open()?;
        let mut index = repo.index()?;
        index.remove_path(Path::new(&Self::block_rel_path(label)))?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let sig = system_signature()?;
        let head = repo.head()?.peel_to_commit()?;
        let message = format!("Delete {label}\n\nAuthor: {author}");
        let oid = repo.commit(Some("HEAD"), &sig, &sig, &message, &tree, &[&head])?;

        info!(user_id = %self.user_id, block = %label, "block deleted");
        Ok(Some(oid.to_string()))
    }

    /// Version history for a block, newest first. The first entry is marked
    /// current.
    pub fn get_block_history(&self, label: &str, limit: usize) -> Result<Vec<VersionInfo>, RepoError> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let repo = self.open()?;
        if repo.head().is_err() {
            return Ok(Vec::new());
        }

        let rel = Self::block_rel_path(label);
        let rel_path = Path::new(&rel);

        let mut revwalk = repo.revwalk()?;
        revwalk.push_head()?;
        revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

        let mut versions = Vec::new();
        for oid in revwalk {
            if versions.len() >= limit {
                break;
            }
            let commit = repo.find_commit(oid?)?;
            let blob = blob_id_at(&commit, rel_path);
            let touched = if commit.parent_count() == 0 {
                blob.is_some()
            } else {
                blob != blob_id_at(&commit.parent(0)?, rel_path)
            };
            if !touched {
                continue;
            }

            let message = commit.message().unwrap_or("").to_string();
            versions.push(VersionInfo {
                commit_sha: commit.id().to_string(),
                message: message.lines().next().unwrap_or("").to_string(),
                author: extract_author(&message),
                timestamp: commit_time(&commit),
                is_current: versions.is_empty(),
            });
        }
        Ok(versions)
    }

    /// Block content at a specific commit, or None when the commit or path
    /// is missing.
    pub fn get_block_at_version(&self, label: &str, commit_sha: &str) -> Result<Option<String>, RepoError> {
        if !self.exists() {
            return Ok(None);
        }
        let repo = self.open()?;
        let Ok(oid) = Oid::from_str(commit_sha) else {
            return Ok(None);
        };
        let Ok(commit) = repo.find_commit(oid) else {
            return Ok(None);
        };
        let rel = Self::block_rel_path(label);
        let tree = commit.tree()?;
        let Ok(entry) = tree.get_path(Path::new(&rel)) else {
            return Ok(None);
        };
        let blob = repo.find_blob(entry.id())?;
        Ok(Some(String::from_utf8_lossy(blob.content()).into_owned()))
    }

    /// Write a previous version's content as a new commit on `main`.
    pub fn restore_block(&self, label: &str, commit_sha: &str) -> Result<String, RepoError> {
        let content = self
            .get_block_at_version(label, commit_sha)?
            .ok_or_else(|| RepoError::VersionNotFound {
                label: label.to_string(),
                sha: commit_sha.to_string(),
            })?;
        let message = format!("Restore {label} to version {}", short_sha(commit_sha));
        self.write_block(label, &content, Some(&message), "user", None, None)
    }

    // ── Proposals ───────────────────────────────────────────────────────────

    /// Create or extend the proposal branch for a block with a body-only
    /// edit. Never touches the working tree; the branch ref is advanced with
    /// a commit whose message is the JSON metadata envelope.
    pub fn create_proposal(
        &self,
        label: &str,
        new_body: &str,
        envelope: &ProposalEnvelope,
    ) -> Result<String, RepoError> {
        let repo = self.open()?;
        let branch_name = proposal_branch_name(&self.user_id, label);
        let refname = format!("refs/heads/{branch_name}");

        // Append to the existing branch, or start one from current main.
        let parent = match repo.find_branch(&branch_name, BranchType::Local) {
            Ok(branch) => branch.get().peel_to_commit()?,
            Err(_) => repo.head()?.peel_to_commit()?,
        };

        let rel = Self::block_rel_path(label);
        let parent_tree = parent.tree()?;
        let entry = parent_tree
            .get_path(Path::new(&rel))
            .map_err(|_| RepoError::BlockNotFound(label.to_string()))?;
        let current = repo.find_blob(entry.id())?;
        let current_content = String::from_utf8_lossy(current.content()).into_owned();

        // Proposals may only change the body; title and schema stay as-is.
        let (metadata, _) = parse_front_matter(&current_content);
        let new_content = if metadata.is_empty() {
            new_body.to_string()
        } else {
            format_front_matter(&metadata, new_body)
        };

        let blob_oid = repo.blob(new_content.as_bytes())?;
        if blob_oid == entry.id() {
            debug!(user_id = %self.user_id, block = %label, "proposal is a no-op; branch unchanged");
            return Ok(branch_name);
        }

        let sub_entry = parent_tree
            .get_name("memory-blocks")
            .ok_or_else(|| RepoError::BlockNotFound(label.to_string()))?;
        let sub_tree = repo.find_tree(sub_entry.id())?;
        let mut sub_builder = repo.treebuilder(Some(&sub_tree))?;
        sub_builder.insert(format!("{label}.md"), blob_oid, 0o100644)?;
        let sub_oid = sub_builder.write()?;

        let mut root_builder = repo.treebuilder(Some(&parent_tree))?;
        root_builder.insert("memory-blocks", sub_oid, 0o040000)?;
        let tree = repo.find_tree(root_builder.write()?)?;

        let message = serde_json::to_string(envelope)
            .map_err(|e| RepoError::Git(git2::Error::from_str(&e.to_string())))?;
        let sig = agent_signature(&envelope.agent_id)?;
        repo.commit(Some(&refname), &sig, &sig, &message, &tree, &[&parent])?;

        info!(
            user_id = %self.user_id,
            block = %label,
            agent = %envelope.agent_id,
            branch = %branch_name,
            "proposal committed"
        );
        Ok(branch_name)
    }

    /// Summaries of every live proposal branch for this user.
    pub fn list_proposals(&self) -> Result<Vec<ProposalInfo>, RepoError> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let repo = self.open()?;
        let prefix = format!("agent/{}/", self.user_id);

        let mut proposals = Vec::new();
        for branch in repo.branches(Some(BranchType::Local))? {
            let (branch, _) = branch?;
            let Some(name) = branch.name()?.map(str::to_string) else {
                continue;
            };
            let Some(block_label) = name.strip_prefix(&prefix) else {
                continue;
            };
            let tip = branch.get().peel_to_commit()?;
            let envelope = ProposalEnvelope::parse(tip.message().unwrap_or(""));
            proposals.push(ProposalInfo {
                branch_name: name.clone(),
                user_id: self.user_id.clone(),
                block_label: block_label.to_string(),
                agent_id: envelope.agent_id,
                reasoning: envelope.reasoning,
                confidence: envelope.confidence,
                created_at: commit_time(&tip),
            });
        }
        Ok(proposals)
    }

    /// Diff of a block between `main` and its proposal branch, or None when
    /// no branch exists.
    pub fn get_proposal_diff(&self, label: &str) -> Result<Option<ProposalDiff>, RepoError> {
        if !self.exists() {
            return Ok(None);
        }
        let repo = self.open()?;
        let branch_name = proposal_branch_name(&self.user_id, label);
        let Ok(branch) = repo.find_branch(&branch_name, BranchType::Local) else {
            return Ok(None);
        };

        let tip = branch.get().peel_to_commit()?;
        let main = repo.head()?.peel_to_commit()?;
        let rel = Self::block_rel_path(label);

        let current_body = body_at(&repo, &main, &rel).unwrap_or_default();
        let proposed_body = body_at(&repo, &tip, &rel).unwrap_or_default();
        let envelope = ProposalEnvelope::parse(tip.message().unwrap_or(""));

        Ok(Some(ProposalDiff {
            branch_name,
            block_label: label.to_string(),
            current_body,
            proposed_body,
            agent_id: envelope.agent_id,
            reasoning: envelope.reasoning,
            confidence: envelope.confidence,
            created_at: commit_time(&tip),
        }))
    }

    /// Merge the proposal branch into `main` and delete it. Returns the
    /// merge commit SHA. Conflicting merges fail loud; the branch is left
    /// intact for the operator to reject.
    pub fn approve_proposal(&self, label: &str) -> Result<String, RepoError> {
        let repo = self.open()?;
        let branch_name = proposal_branch_name(&self.user_id, label);
        let branch = repo
            .find_branch(&branch_name, BranchType::Local)
            .map_err(|_| RepoError::ProposalMissing(label.to_string()))?;
        let tip = branch.get().peel_to_commit()?;
        let main = repo.head()?.peel_to_commit()?;

        let envelope = ProposalEnvelope::parse(tip.message().unwrap_or(""));
        let reasoning = if envelope.reasoning.is_empty() {
            "No reasoning provided".to_string()
        } else {
            truncate_chars(&envelope.reasoning, REASONING_EXCERPT_CHARS)
        };

        let mut merged = repo.merge_commits(&main, &tip, None)?;
        if merged.has_conflicts() {
            warn!(user_id = %self.user_id, block = %label, "proposal merge conflict");
            return Err(RepoError::MergeConflict(label.to_string()));
        }

        let tree = repo.find_tree(merged.write_tree_to(&repo)?)?;
        let sig = system_signature()?;
        let message = format!("Approve agent proposal: {reasoning}");
        let merge_oid = repo.commit(
            Some("refs/heads/main"),
            &sig,
            &sig,
            &message,
            &tree,
            &[&main, &tip],
        )?;

        // Sync the working tree with the advanced main.
        repo.checkout_head(Some(CheckoutBuilder::new().force()))?;

        repo.find_branch(&branch_name, BranchType::Local)?.delete()?;

        info!(
            user_id = %self.user_id,
            block = %label,
            sha = %short_sha(&merge_oid.to_string()),
            "proposal approved and merged"
        );
        Ok(merge_oid.to_string())
    }

    /// Delete the proposal branch. Returns whether it existed.
    pub fn reject_proposal(&self, label: &str) -> Result<bool, RepoError> {
        let repo = self.open()?;
        let branch_name = proposal_branch_name(&self.user_id, label);
        let result = match repo.find_branch(&branch_name, BranchType::Local) {
            Ok(mut branch) => {
                branch.delete()?;
                info!(user_id = %self.user_id, block = %label, "proposal rejected");
                Ok(true)
            }
            Err(_) => Ok(false),
        };
        result
    }
}

fn system_signature() -> Result<Signature<'static>, git2::Error> {
    Signature::now(SYSTEM_NAME, SYSTEM_EMAIL)
}

fn agent_signature(agent_id: &str) -> Result<Signature<'static>, git2::Error> {
    Signature::now(&format!("agent:{agent_id}"), AGENT_EMAIL)
}

fn blob_id_at(commit: &Commit<'_>, path: &Path) -> Option<Oid> {
    commit.tree().ok()?.get_path(path).ok().map(|e| e.id())
}

fn body_at(repo: &Repository, commit: &Commit<'_>, rel: &str) -> Option<String> {
    let entry = commit.tree().ok()?.get_path(Path::new(rel)).ok()?;
    let blob = repo.find_blob(entry.id()).ok()?;
    let content = String::from_utf8_lossy(blob.content()).into_owned();
    let (_, body) = parse_front_matter(&content);
    Some(body)
}

fn commit_time(commit: &Commit<'_>) -> DateTime<Utc> {
    DateTime::from_timestamp(commit.time().seconds(), 0).unwrap_or_else(Utc::now)
}

/// Extract the author from the `Author: ...` commit message footer.
fn extract_author(message: &str) -> String {
    message
        .lines()
        .find_map(|line| line.strip_prefix("Author: "))
        .unwrap_or("unknown")
        .to_string()
}

fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(8)]
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
