//! Memory context assembly and user activity tracking.
//!
//! `context` renders memory blocks into the prompt section injected into
//! agent instructions and seeds new users with the welcome templates.
//! `activity` answers the idle-trigger question: who has been quiet long
//! enough, and is outside the per-task cooldown window?

pub mod activity;
pub mod context;
pub mod db;

pub use activity::ActivityTracker;
pub use context::{build_memory_context, ensure_welcome_blocks};
