//! Per-user sandboxed workspaces.
//!
//! A workspace is a bounded directory tree the conversational agent may read
//! and write through tools, and the workspace HTTP API exposes for upload and
//! download. Every path is validated against escapes, writes respect a size
//! cap, and an on-disk sync index tracks `sha256` content hashes.

pub mod sync;
pub mod types;

pub use sync::{Workspace, WorkspaceManager};
pub use types::{FileMetadata, SyncState, WorkspaceIndex};
