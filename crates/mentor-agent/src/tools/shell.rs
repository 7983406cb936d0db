//! Tool: shell — one-shot command execution with the workspace as cwd.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{Tool, ToolResult};

/// Commands are killed after this long.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Combined stdout/stderr cap returned to the model.
const MAX_OUTPUT_CHARS: usize = 20_000;

pub struct ShellTool {
    cwd: PathBuf,
}

impl ShellTool {
    pub fn new(cwd: &Path) -> Self {
        Self {
            cwd: cwd.to_path_buf(),
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in your workspace and return its stdout and \
         stderr. Timeout is 30 seconds."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute via sh -c."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(command) = input.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: command");
        };

        debug!(command, cwd = %self.cwd.display(), "executing shell command");

        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.cwd)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(COMMAND_TIMEOUT, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return ToolResult::error(format!("failed to run command: {e}")),
            Err(_) => {
                return ToolResult::error(format!(
                    "command timed out after {}s",
                    COMMAND_TIMEOUT.as_secs()
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let mut result = String::new();
        if !stdout.is_empty() {
            result.push_str(&stdout);
        }
        if !stderr.is_empty() {
            if !result.is_empty() {
                result.push('\n');
            }
            result.push_str("[stderr]\n");
            result.push_str(&stderr);
        }
        if !output.status.success() {
            result.push_str(&format!(
                "\n[exit code: {}]",
                output.status.code().unwrap_or(-1)
            ));
        }
        if result.is_empty() {
            result = "(no output)".to_string();
        }
        if result.len() > MAX_OUTPUT_CHARS {
            result.truncate(MAX_OUTPUT_CHARS);
            result.push_str("\n\n[output truncated]");
        }

        ToolResult::success(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn runs_in_workspace_cwd() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let tool = ShellTool::new(dir.path());

        let result = tool.execute(serde_json::json!({"command": "ls"})).await;
        assert!(!result.is_error);
        assert!(result.content.contains("marker.txt"));
    }

    #[tokio::test]
    async fn reports_exit_code_and_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellTool::new(dir.path());

        let result = tool
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}))
            .await;
        assert!(!result.is_error);
        assert!(result.content.contains("[stderr]"));
        assert!(result.content.contains("[exit code: 3]"));
    }
}
