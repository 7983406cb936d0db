//! Workspace file operations and the sync-state index.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mentor_core::{MentorError, Result};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::types::{FileMetadata, SyncState, WorkspaceIndex};

const SYNC_STATE_FILE: &str = ".sync_state.json";

/// Names ignored by the index scan. Suffix patterns start with '*'.
const IGNORE_PATTERNS: &[&str] = &[
    ".git",
    ".DS_Store",
    "node_modules",
    SYNC_STATE_FILE,
    "*.tmp",
    "*.swp",
];

/// Resolves workspace roots and hands out per-user [`Workspace`] handles.
///
/// Index writes for one user serialize on a per-user lock; distinct users
/// are independent.
pub struct WorkspaceManager {
    data_root: PathBuf,
    shared_path: Option<PathBuf>,
    max_file_bytes: u64,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl WorkspaceManager {
    pub fn new(data_root: impl AsRef<Path>, shared_path: Option<&str>, max_file_bytes: u64) -> Self {
        Self {
            data_root: data_root.as_ref().to_path_buf(),
            shared_path: shared_path.map(PathBuf::from),
            max_file_bytes,
            locks: DashMap::new(),
        }
    }

    /// Workspace root for a user — shared when configured, otherwise
    /// `{data_root}/users/{user_id}/workspace/`. Creates the directory.
    pub fn for_user(&self, user_id: &str) -> Result<Workspace> {
        let root = match &self.shared_path {
            Some(shared) => shared.clone(),
            None => self
                .data_root
                .join("users")
                .join(user_id)
                .join("workspace"),
        };
        std::fs::create_dir_all(&root).map_err(|e| MentorError::Internal(e.to_string()))?;
        let lock = self
            .locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        Ok(Workspace {
            user_id: user_id.to_string(),
            root,
            max_file_bytes: self.max_file_bytes,
            lock,
        })
    }
}

/// One user's workspace view.
#[derive(Clone)]
pub struct Workspace {
    user_id: String,
    root: PathBuf,
    max_file_bytes: u64,
    lock: Arc<Mutex<()>>,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `CLAUDE.md` content at the workspace root, verbatim.
    pub fn claude_md(&self) -> Option<String> {
        std::fs::read_to_string(self.root.join("CLAUDE.md")).ok()
    }

    /// Validate a relative path and resolve it under the root.
    ///
    /// Rejects absolute paths, traversal that climbs above the root, and
    /// symlinks whose resolved form escapes — even when the filesystem
    /// itself would accept them.
    fn resolve(&self, rel: &str) -> Result<PathBuf> {
        let rel_path = Path::new(rel);
        if rel.is_empty() || rel_path.is_absolute() {
            return Err(MentorError::InvalidPath(rel.to_string()));
        }

        let mut depth: i32 = 0;
        for comp in rel_path.components() {
            match comp {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(MentorError::InvalidPath(rel.to_string()));
                    }
                }
                _ => return Err(MentorError::InvalidPath(rel.to_string())),
            }
        }

        let full = self.root.join(rel_path);

        // Symbolic resolution: the nearest existing ancestor must still live
        // under the canonical root.
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| MentorError::Internal(e.to_string()))?;
        let mut probe = full.clone();
        while !probe.exists() {
            match probe.parent() {
                Some(parent) => probe = parent.to_path_buf(),
                None => return Err(MentorError::InvalidPath(rel.to_string())),
            }
        }
        let canonical_probe = probe
            .canonicalize()
            .map_err(|e| MentorError::Internal(e.to_string()))?;
        if !canonical_probe.starts_with(&canonical_root) {
            return Err(MentorError::InvalidPath(rel.to_string()));
        }

        Ok(full)
    }

    pub async fn read_file(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.resolve(rel)?;
        if !path.is_file() {
            return Err(MentorError::FileNotFound { path: rel.to_string() });
        }
        tokio::fs::read(&path)
            .await
            .map_err(|e| MentorError::Internal(e.to_string()))
    }

    /// Write a file and update the sync index. Enforces the size cap.
    pub async fn write_file(&self, rel: &str, content: &[u8]) -> Result<FileMetadata> {
        let path = self.resolve(rel)?;
        if content.len() as u64 > self.max_file_bytes {
            return Err(MentorError::FileTooLarge {
                size: content.len() as u64,
                max: self.max_file_bytes,
            });
        }

        let _guard = self.lock.lock().await;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| MentorError::Internal(e.to_string()))?;
        }
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| MentorError::Internal(e.to_string()))?;

        let metadata = FileMetadata {
            path: rel.to_string(),
            hash: compute_hash(content),
            size: content.len() as u64,
            modified: Utc::now().to_rfc3339(),
            source: "mentor".to_string(),
            openwebui_file_id: None,
            synced_at: None,
        };

        let mut state = self.load_state();
        // Unchanged content keeps its sync linkage.
        if let Some(existing) = state.files.get(rel) {
            if existing.hash == metadata.hash {
                let mut merged = metadata.clone();
                merged.openwebui_file_id = existing.openwebui_file_id.clone();
                merged.synced_at = existing.synced_at.clone();
                state.files.insert(rel.to_string(), merged.clone());
                self.save_state(&state)?;
                return Ok(merged);
            }
        }
        state.files.insert(rel.to_string(), metadata.clone());
        self.save_state(&state)?;

        debug!(user_id = %self.user_id, path = rel, size = content.len(), "workspace file written");
        Ok(metadata)
    }

    /// Delete a file. Returns false when it did not exist.
    pub async fn delete_file(&self, rel: &str) -> Result<bool> {
        let path = self.resolve(rel)?;
        if !path.is_file() {
            return Ok(false);
        }

        let _guard = self.lock.lock().await;
        tokio::fs::remove_file(&path)
            .await
            .map_err(|e| MentorError::Internal(e.to_string()))?;
        let mut state = self.load_state();
        state.files.remove(rel);
        self.save_state(&state)?;
        Ok(true)
    }

    /// Current index from the sync state, without rescanning.
    pub fn file_index(&self) -> WorkspaceIndex {
        let state = self.load_state();
        let files: Vec<FileMetadata> = state.files.into_values().collect();
        let total_size = files.iter().map(|f| f.size).sum();
        WorkspaceIndex {
            user_id: self.user_id.clone(),
            files,
            total_size,
        }
    }

    /// Rescan the tree, rehash changed files, drop vanished entries, and
    /// persist the refreshed state. Files that kept their hash keep their
    /// sync linkage, and indexed unchanged files skip rehashing via mtime.
    pub async fn refresh_index(&self) -> Result<WorkspaceIndex> {
        let _guard = self.lock.lock().await;
        let old_state = self.load_state();
        let mut state = SyncState {
            user_id: self.user_id.clone(),
            files: Default::default(),
        };

        let mut stack = vec![self.root.clone()];
        while let Some(dir) = stack.pop() {
            let entries = match std::fs::read_dir(&dir) {
                Ok(e) => e,
                Err(e) => {
                    warn!(path = %dir.display(), error = %e, "workspace scan skipped directory");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                let name = entry.file_name().to_string_lossy().into_owned();
                if should_ignore(&name) {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                if meta.len() > self.max_file_bytes {
                    warn!(path = %path.display(), size = meta.len(), "file exceeds cap; not indexed");
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.root) else { continue };
                let rel = rel.to_string_lossy().into_owned();
                let modified = modified_time(&meta);

                // Reuse the previous hash when size and mtime are unchanged.
                if let Some(prev) = old_state.files.get(&rel) {
                    if prev.size == meta.len() && prev.modified == modified {
                        state.files.insert(rel, prev.clone());
                        continue;
                    }
                }

                let Ok(content) = std::fs::read(&path) else { continue };
                let hash = compute_hash(&content);
                let mut entry = FileMetadata {
                    path: rel.clone(),
                    hash,
                    size: meta.len(),
                    modified,
                    source: "mentor".to_string(),
                    openwebui_file_id: None,
                    synced_at: None,
                };
                if let Some(prev) = old_state.files.get(&rel) {
                    if prev.hash == entry.hash {
                        entry.openwebui_file_id = prev.openwebui_file_id.clone();
                        entry.synced_at = prev.synced_at.clone();
                    }
                }
                state.files.insert(rel, entry);
            }
        }

        self.save_state(&state)?;
        let files: Vec<FileMetadata> = state.files.into_values().collect();
        let total_size = files.iter().map(|f| f.size).sum();
        Ok(WorkspaceIndex {
            user_id: self.user_id.clone(),
            files,
            total_size,
        })
    }

    fn state_path(&self) -> PathBuf {
        self.root.join(SYNC_STATE_FILE)
    }

    fn load_state(&self) -> SyncState {
        let Ok(data) = std::fs::read_to_string(self.state_path()) else {
            return SyncState {
                user_id: self.user_id.clone(),
                files: Default::default(),
            };
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!(user_id = %self.user_id, error = %e, "sync state unreadable; starting fresh");
            SyncState {
                user_id: self.user_id.clone(),
                files: Default::default(),
            }
        })
    }

    fn save_state(&self, state: &SyncState) -> Result<()> {
        let json = serde_json::to_string_pretty(state)
            .map_err(|e| MentorError::Internal(e.to_string()))?;
        std::fs::write(self.state_path(), json).map_err(|e| MentorError::Internal(e.to_string()))
    }
}

/// Compute the `sha256:<hex>` content hash used throughout the index.
pub fn compute_hash(content: &[u8]) -> String {
    let digest = Sha256::digest(content);
    format!("sha256:{}", hex::encode(digest))
}

fn should_ignore(name: &str) -> bool {
    IGNORE_PATTERNS.iter().any(|pattern| {
        if let Some(suffix) = pattern.strip_prefix('*') {
            name.ends_with(suffix)
        } else {
            name == *pattern
        }
    })
}

fn modified_time(meta: &std::fs::Metadata) -> String {
    meta.modified()
        .ok()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_else(|| Utc::now().to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_workspace() -> (tempfile::TempDir, Workspace) {
        let dir = tempfile::tempdir().expect("tempdir");
        let manager = WorkspaceManager::new(dir.path(), None, 1024);
        let ws = manager.for_user("u1").expect("workspace");
        (dir, ws)
    }

    #[tokio::test]
    async fn write_read_delete_round_trip() {
        let (_dir, ws) = make_workspace();
        let meta = ws.write_file("notes/plan.md", b"# Plan").await.unwrap();
        assert!(meta.hash.starts_with("sha256:"));
        assert_eq!(meta.size, 6);

        let content = ws.read_file("notes/plan.md").await.unwrap();
        assert_eq!(content, b"# Plan");

        assert!(ws.delete_file("notes/plan.md").await.unwrap());
        assert!(!ws.delete_file("notes/plan.md").await.unwrap());
        assert!(matches!(
            ws.read_file("notes/plan.md").await.unwrap_err(),
            MentorError::FileNotFound { .. }
        ));
    }

    #[tokio::test]
    async fn rejects_escaping_paths() {
        let (_dir, ws) = make_workspace();
        for bad in ["../outside.txt", "a/../../outside.txt", "/etc/passwd"] {
            let err = ws.read_file(bad).await.unwrap_err();
            assert!(matches!(err, MentorError::InvalidPath(_)), "path: {bad}");
        }
        // `..` that stays inside the root is fine.
        ws.write_file("a/b.txt", b"x").await.unwrap();
        assert_eq!(ws.read_file("a/../a/b.txt").await.unwrap(), b"x");
    }

    #[tokio::test]
    async fn enforces_size_cap() {
        let (_dir, ws) = make_workspace();
        let big = vec![0u8; 2048];
        let err = ws.write_file("big.bin", &big).await.unwrap_err();
        assert!(matches!(err, MentorError::FileTooLarge { size: 2048, max: 1024 }));
        assert!(ws.read_file("big.bin").await.is_err());
    }

    #[tokio::test]
    async fn index_tracks_writes_and_refresh() {
        let (_dir, ws) = make_workspace();
        ws.write_file("a.txt", b"aaa").await.unwrap();
        ws.write_file("b.txt", b"bbbb").await.unwrap();

        let index = ws.file_index();
        assert_eq!(index.files.len(), 2);
        assert_eq!(index.total_size, 7);

        // A file created behind the index's back appears after refresh.
        std::fs::write(ws.root().join("c.txt"), b"cc").unwrap();
        let refreshed = ws.refresh_index().await.unwrap();
        assert_eq!(refreshed.files.len(), 3);
        assert_eq!(refreshed.total_size, 9);

        // Deleted files fall out on refresh.
        std::fs::remove_file(ws.root().join("a.txt")).unwrap();
        let refreshed = ws.refresh_index().await.unwrap();
        assert_eq!(refreshed.files.len(), 2);
    }

    #[tokio::test]
    async fn claude_md_is_exposed_verbatim() {
        let (_dir, ws) = make_workspace();
        assert!(ws.claude_md().is_none());
        ws.write_file("CLAUDE.md", b"Always answer in haiku.").await.unwrap();
        assert_eq!(ws.claude_md().as_deref(), Some("Always answer in haiku."));
    }
}
