//! Workspace file tools — read, write, delete, and list, all scoped to the
//! bound user's workspace root.

use async_trait::async_trait;
use mentor_workspace::Workspace;

use super::{Tool, ToolResult};

/// Maximum characters returned by read_file to avoid flooding the context
/// window.
const MAX_OUTPUT_CHARS: usize = 30_000;

pub struct ReadFileTool {
    workspace: Workspace,
}

impl ReadFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read the contents of a file in your workspace."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };

        match self.workspace.read_file(path).await {
            Ok(bytes) => {
                let content = String::from_utf8_lossy(&bytes).into_owned();
                let content = if content.len() > MAX_OUTPUT_CHARS {
                    format!(
                        "{}\n\n[output truncated at {} characters]",
                        &content[..MAX_OUTPUT_CHARS],
                        MAX_OUTPUT_CHARS,
                    )
                } else {
                    content
                };
                ToolResult::success(content)
            }
            Err(e) => ToolResult::error(format!("failed to read '{path}': {e}")),
        }
    }
}

pub struct WriteFileTool {
    workspace: Workspace,
}

impl WriteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file in your workspace, creating parent \
         directories as needed."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root."
                },
                "content": {
                    "type": "string",
                    "description": "Full file content to write."
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(content) = input.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: content");
        };

        match self.workspace.write_file(path, content.as_bytes()).await {
            Ok(meta) => ToolResult::success(format!("Wrote {} bytes to '{path}'.", meta.size)),
            Err(e) => ToolResult::error(format!("failed to write '{path}': {e}")),
        }
    }
}

pub struct DeleteFileTool {
    workspace: Workspace,
}

impl DeleteFileTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for DeleteFileTool {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file from your workspace."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root."
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };

        match self.workspace.delete_file(path).await {
            Ok(true) => ToolResult::success(format!("Deleted '{path}'.")),
            Ok(false) => ToolResult::error(format!("file not found: {path}")),
            Err(e) => ToolResult::error(format!("failed to delete '{path}': {e}")),
        }
    }
}

pub struct ListFilesTool {
    workspace: Workspace,
}

impl ListFilesTool {
    pub fn new(workspace: Workspace) -> Self {
        Self { workspace }
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List the files in your workspace with sizes."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _input: serde_json::Value) -> ToolResult {
        match self.workspace.refresh_index().await {
            Ok(index) if index.files.is_empty() => ToolResult::success("The workspace is empty."),
            Ok(index) => {
                let lines: Vec<String> = index
                    .files
                    .iter()
                    .map(|f| format!("{} ({} bytes)", f.path, f.size))
                    .collect();
                ToolResult::success(lines.join("\n"))
            }
            Err(e) => ToolResult::error(format!("failed to list files: {e}")),
        }
    }
}
