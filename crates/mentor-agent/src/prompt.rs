//! Instruction and prompt assembly for a chat turn.

use std::path::Path;

use mentor_core::types::ChatMessage;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI tutor assistant. \
    Always be helpful, encouraging, and focused on the student's learning goals.";

/// Pull a leading system message out of the history, when present.
/// Returns (per-chat system prompt, remaining messages).
pub fn extract_system_message(messages: &[ChatMessage]) -> (Option<String>, Vec<ChatMessage>) {
    if let Some(first) = messages.first() {
        if first.role == "system" {
            return (Some(first.content.clone()), messages[1..].to_vec());
        }
    }
    (None, messages.to_vec())
}

/// Assemble the full instruction text for a turn, in order: per-chat system
/// prompt (or the default), tool-usage instructions, optional CLAUDE.md
/// section, optional memory-context section.
pub fn build_instructions(
    per_chat_system: Option<&str>,
    workspace_root: &Path,
    claude_md: Option<&str>,
    memory_context: &str,
) -> String {
    let base = per_chat_system.unwrap_or(DEFAULT_SYSTEM_PROMPT);

    let tool_instructions = format!(
        "## Tool Usage\n\n\
        Your workspace is: {workspace}\n\
        You can read and write files, and execute shell commands within this workspace.\n\n\
        ### Memory Blocks\n\n\
        You have access to memory blocks that contain persistent information about the student.\n\
        These blocks are shown below in \"Student Context\" when available.\n\n\
        To update memory blocks, use the memory block tools:\n\
        1. First, use `read_memory_block` to see the exact current content\n\
        2. Then, use `propose_memory_edit` with exact string matching to suggest changes\n\
        3. Your edits will be submitted as proposals that require user approval\n\n\
        Important: The `old_string` in your edit must match the block content exactly,\n\
        including whitespace and newlines. If the string appears multiple times,\n\
        provide more surrounding context to make it unique, or use `replace_all=true`.",
        workspace = workspace_root.display()
    );

    let mut parts = vec![base.to_string(), tool_instructions];

    if let Some(claude_md) = claude_md {
        parts.push(format!(
            "---\n\n# Project Instructions (from CLAUDE.md)\n\n{claude_md}"
        ));
    }

    if !memory_context.is_empty() {
        parts.push(format!(
            "---\n\n# Student Context\n\n\
            The following information has been recorded about this student. \
            Use this to personalize your tutoring approach.\n\n{memory_context}"
        ));
    }

    parts.join("\n\n")
}

/// Render the (system-stripped) history into a single prompt string.
/// A lone message passes through; longer histories become alternating
/// `User:` / `Assistant:` blocks with the current message set off at the end.
pub fn format_history(messages: &[ChatMessage]) -> String {
    match messages {
        [] => String::new(),
        [only] => only.content.clone(),
        _ => {
            let history: Vec<String> = messages[..messages.len() - 1]
                .iter()
                .map(|msg| {
                    let role_label = if msg.role == "user" { "User" } else { "Assistant" };
                    format!("{role_label}: {}", msg.content)
                })
                .collect();
            let current = &messages[messages.len() - 1].content;

            format!(
                "Here is our conversation so far:\n\n{}\n\n---\n\nNow, the user says:\n{current}",
                history.join("\n\n")
            )
        }
    }
}
