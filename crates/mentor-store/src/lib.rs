//! Git-backed per-user memory block storage.
//!
//! Every user owns a standalone git repository under
//! `{data_root}/users/{user_id}/`. Blocks are markdown files with YAML
//! front-matter in `memory-blocks/`; every mutation is a commit on `main`.
//! Agent-proposed edits live on `agent/{user_id}/{label}` branches until a
//! human approves (merge) or rejects (branch delete) them, with an
//! out-of-band JSON record per proposal in `pending_diffs/`.

pub mod diffs;
pub mod frontmatter;
pub mod repo;
pub mod service;
pub mod types;

pub use diffs::{PendingDiff, PendingDiffStore};
pub use service::BlockService;
pub use types::*;
