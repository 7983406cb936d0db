//! Memory block tools — list, read, and propose surgical edits.
//!
//! Edits never touch `main` directly: `propose_memory_edit` submits a
//! proposal that a human approves or rejects. The replacement is guarded the
//! same way an exact-match code edit would be: the old string must exist and
//! be unique unless `replace_all` is set.

use std::sync::Arc;

use async_trait::async_trait;
use mentor_core::types::Confidence;
use mentor_store::diffs::DiffOperation;
use mentor_store::frontmatter::default_title;
use mentor_store::BlockService;
use tracing::{info, warn};

use super::{Tool, ToolResult};

pub struct ListMemoryBlocksTool {
    blocks: Arc<BlockService>,
    user_id: String,
}

impl ListMemoryBlocksTool {
    pub fn new(blocks: Arc<BlockService>, user_id: &str) -> Self {
        Self {
            blocks,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl Tool for ListMemoryBlocksTool {
    fn name(&self) -> &str {
        "list_memory_blocks"
    }

    fn description(&self) -> &str {
        "List all available memory blocks for the current student, with their \
         labels and titles."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        match self.blocks.list_blocks(&self.user_id).await {
            Ok(blocks) if blocks.is_empty() => {
                ToolResult::success("No memory blocks exist for this student yet.")
            }
            Ok(blocks) => {
                let mut lines = vec!["Available memory blocks:".to_string(), String::new()];
                for block in blocks {
                    let title = block.title.unwrap_or_else(|| default_title(&block.label));
                    lines.push(format!("- {}: {}", block.label, title));
                }
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => {
                warn!(user_id = %self.user_id, error = %e, "list_memory_blocks failed");
                ToolResult::error(format!("Error listing memory blocks: {e}"))
            }
        }
    }
}

pub struct ReadMemoryBlockTool {
    blocks: Arc<BlockService>,
    user_id: String,
}

impl ReadMemoryBlockTool {
    pub fn new(blocks: Arc<BlockService>, user_id: &str) -> Self {
        Self {
            blocks,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl Tool for ReadMemoryBlockTool {
    fn name(&self) -> &str {
        "read_memory_block"
    }

    fn description(&self) -> &str {
        "Read the current content of a memory block. Use this before proposing \
         edits to see the exact current content."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "block_label": {
                    "type": "string",
                    "description": "The label of the block to read (e.g. \"student\", \"goals\")."
                }
            },
            "required": ["block_label"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(label) = input.get("block_label").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: block_label");
        };

        match self.blocks.get_block(&self.user_id, label).await {
            Ok(Some(block)) => {
                let title = block.title.unwrap_or_else(|| default_title(label));
                let body = if block.body.is_empty() {
                    "(empty)".to_string()
                } else {
                    block.body
                };
                ToolResult::success(format!("# {title}\n\n{body}"))
            }
            Ok(None) => ToolResult::error(format!("Memory block '{label}' not found.")),
            Err(e) => {
                warn!(user_id = %self.user_id, block = label, error = %e, "read_memory_block failed");
                ToolResult::error(format!("Error reading memory block: {e}"))
            }
        }
    }
}

pub struct ProposeMemoryEditTool {
    blocks: Arc<BlockService>,
    user_id: String,
    agent_id: String,
}

impl ProposeMemoryEditTool {
    pub fn new(blocks: Arc<BlockService>, user_id: &str, agent_id: &str) -> Self {
        Self {
            blocks,
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
        }
    }
}

#[async_trait]
impl Tool for ProposeMemoryEditTool {
    fn name(&self) -> &str {
        "propose_memory_edit"
    }

    fn description(&self) -> &str {
        "Propose an edit to a memory block using exact string replacement. The \
         edit is submitted as a proposal requiring user approval. old_string \
         must match exactly (including whitespace) and must be unique in the \
         block unless replace_all is true. Read the block first — the edit \
         fails if old_string is not found or not unique."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "block_label": {
                    "type": "string",
                    "description": "The label of the block to edit."
                },
                "old_string": {
                    "type": "string",
                    "description": "The exact text to find and replace. Must be unique unless replace_all is true."
                },
                "new_string": {
                    "type": "string",
                    "description": "The text to replace it with. Must differ from old_string."
                },
                "reasoning": {
                    "type": "string",
                    "description": "Brief explanation of why this edit is needed (shown to the user for approval)."
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences instead of requiring uniqueness. Defaults to false."
                }
            },
            "required": ["block_label", "old_string", "new_string", "reasoning"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let label = input.get("block_label").and_then(|v| v.as_str()).unwrap_or("");
        let old_string = input.get("old_string").and_then(|v| v.as_str()).unwrap_or("");
        let new_string = input.get("new_string").and_then(|v| v.as_str()).unwrap_or("");
        let reasoning = input.get("reasoning").and_then(|v| v.as_str()).unwrap_or("");
        let replace_all = input
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if label.is_empty() {
            return ToolResult::error("missing required parameter: block_label");
        }
        if old_string == new_string {
            return ToolResult::error("Error: old_string and new_string must be different.");
        }
        if old_string.is_empty() {
            return ToolResult::error("Error: old_string cannot be empty.");
        }
        if reasoning.is_empty() {
            return ToolResult::error(
                "Error: reasoning is required to explain the edit to the user.",
            );
        }

        let current_body = match self.blocks.get_block(&self.user_id, label).await {
            Ok(Some(block)) => block.body,
            Ok(None) => {
                return ToolResult::error(format!("Error: Memory block '{label}' not found."));
            }
            Err(e) => return ToolResult::error(format!("Error creating edit proposal: {e}")),
        };

        if !current_body.contains(old_string) {
            return ToolResult::error(format!(
                "Error: old_string not found in block '{label}'. Make sure you've \
                 read the block first and the text matches exactly (including \
                 whitespace and newlines)."
            ));
        }

        let occurrence_count = current_body.matches(old_string).count();
        if occurrence_count > 1 && !replace_all {
            return ToolResult::error(format!(
                "Error: old_string appears {occurrence_count} times in block '{label}'. \
                 Provide a larger unique string with more surrounding context, or set \
                 replace_all=true to replace all occurrences."
            ));
        }

        let new_body = if replace_all {
            current_body.replace(old_string, new_string)
        } else {
            current_body.replacen(old_string, new_string, 1)
        };

        match self
            .blocks
            .propose_edit(
                &self.user_id,
                label,
                &new_body,
                &self.agent_id,
                reasoning,
                Confidence::Medium,
                DiffOperation::Replace,
                None,
            )
            .await
        {
            Ok(diff) => {
                info!(
                    user_id = %self.user_id,
                    block = label,
                    diff_id = %diff.id,
                    "memory edit proposed"
                );
                ToolResult::success(format!(
                    "Edit proposal created for block '{label}'. The user will be \
                     asked to approve this change. Reasoning provided: {reasoning}"
                ))
            }
            Err(e) => {
                warn!(user_id = %self.user_id, block = label, error = %e, "propose_memory_edit failed");
                ToolResult::error(format!("Error creating edit proposal: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_fixture(body: &str) -> (tempfile::TempDir, Arc<BlockService>, ProposeMemoryEditTool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let blocks = Arc::new(BlockService::new(dir.path()));
        blocks.init_user("u1").await.unwrap();
        blocks
            .write_block("u1", "student", body, None, "user", None, None)
            .await
            .unwrap();
        let tool = ProposeMemoryEditTool::new(blocks.clone(), "u1", "mentor");
        (dir, blocks, tool)
    }

    fn edit_input(old: &str, new: &str) -> serde_json::Value {
        serde_json::json!({
            "block_label": "student",
            "old_string": old,
            "new_string": new,
            "reasoning": "Student expressed stronger enthusiasm",
        })
    }

    #[tokio::test]
    async fn happy_path_creates_proposal() {
        let (_dir, blocks, tool) = make_fixture("The student likes math.").await;
        let result = tool
            .execute(edit_input("likes math", "loves mathematics"))
            .await;
        assert!(!result.is_error, "{}", result.content);
        assert!(result.content.contains("Edit proposal created"));

        let (diff, _) = blocks
            .get_proposal_diff("u1", "student")
            .await
            .unwrap()
            .expect("diff exists");
        assert_eq!(diff.proposed_body, "The student loves mathematics.");
        // main untouched
        let block = blocks.get_block("u1", "student").await.unwrap().unwrap();
        assert_eq!(block.body, "The student likes math.");
    }

    #[tokio::test]
    async fn ambiguous_match_is_rejected_with_count() {
        let (_dir, blocks, tool) =
            make_fixture("The student likes math. The student also likes science.").await;
        let result = tool.execute(edit_input("The student", "This student")).await;
        assert!(result.is_error);
        assert!(result.content.contains("appears 2 times"), "{}", result.content);
        assert!(result.content.contains("replace_all"), "{}", result.content);

        // No branch, no pending diff.
        assert!(blocks.get_proposal_diff("u1", "student").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_all_replaces_every_occurrence() {
        let (_dir, blocks, tool) =
            make_fixture("The student likes math. The student also likes science.").await;
        let mut input = edit_input("The student", "This student");
        input["replace_all"] = serde_json::json!(true);
        let result = tool.execute(input).await;
        assert!(!result.is_error, "{}", result.content);

        let (diff, _) = blocks
            .get_proposal_diff("u1", "student")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            diff.proposed_body,
            "This student likes math. This student also likes science."
        );
    }

    #[tokio::test]
    async fn validation_failures_are_descriptive() {
        let (_dir, _blocks, tool) = make_fixture("body").await;

        let result = tool.execute(edit_input("same", "same")).await;
        assert!(result.content.contains("must be different"));

        let result = tool.execute(edit_input("", "x")).await;
        assert!(result.content.contains("cannot be empty"));

        let mut input = edit_input("body", "new body");
        input["reasoning"] = serde_json::json!("");
        let result = tool.execute(input).await;
        assert!(result.content.contains("reasoning is required"));

        let result = tool.execute(edit_input("not present", "x")).await;
        assert!(result.content.contains("not found in block"));

        let mut input = edit_input("body", "x");
        input["block_label"] = serde_json::json!("ghost");
        let result = tool.execute(input).await;
        assert!(result.content.contains("'ghost' not found"));
    }

    #[tokio::test]
    async fn read_tool_returns_title_and_body() {
        let (_dir, blocks, _tool) = make_fixture("The body.").await;
        let read = ReadMemoryBlockTool::new(blocks, "u1");
        let result = read
            .execute(serde_json::json!({"block_label": "student"}))
            .await;
        assert!(!result.is_error);
        assert_eq!(result.content, "# Student\n\nThe body.");
    }
}
