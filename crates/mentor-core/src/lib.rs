//! Shared foundation for the Mentor runtime: configuration, the service-wide
//! error taxonomy, and the chat message types exchanged between the gateway
//! and the agent runner.

pub mod config;
pub mod error;
pub mod types;

pub use error::{MentorError, Result};
