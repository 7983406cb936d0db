//! HTTP gateway for the Mentor runtime: router assembly, SSE chat
//! streaming, and the REST surface over blocks, proposals, background
//! tasks, and workspace files.

pub mod app;
pub mod error;
pub mod http;
