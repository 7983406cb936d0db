//! Tool system for agent tool calling.
//!
//! Tools are plain values constructed per invocation and bound to a user at
//! construction time — no shared mutable state, no implicit globals. The
//! executor builds a fresh set for every turn or background run.

pub mod dialectic;
pub mod memory;
pub mod shell;
pub mod workspace_files;

use std::sync::Arc;

use async_trait::async_trait;
use mentor_store::BlockService;
use mentor_workspace::Workspace;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::collaborator::ConversationStoreClient;
use crate::provider::ToolDefinition;

/// Result of executing a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Text content returned to the LLM.
    pub content: String,
    /// Whether the tool execution failed.
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Trait that all tools implement.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name for this tool (e.g. "read_memory_block").
    fn name(&self) -> &str;
    /// Human-readable description of what this tool does.
    fn description(&self) -> &str;
    /// JSON Schema for the tool's input parameters.
    fn input_schema(&self) -> serde_json::Value;
    /// Execute the tool with the given input.
    async fn execute(&self, input: serde_json::Value) -> ToolResult;
}

/// Everything a tool set can be bound to for one invocation.
#[derive(Clone)]
pub struct ToolBindings {
    pub user_id: String,
    pub agent_id: String,
    pub blocks: Arc<BlockService>,
    pub workspace: Option<Workspace>,
    pub collaborator: Arc<ConversationStoreClient>,
}

/// The full tool set for a foreground chat turn.
pub fn foreground_tools(bindings: &ToolBindings) -> Vec<Box<dyn Tool>> {
    let mut tools = memory_tools(bindings);
    tools.push(Box::new(dialectic::DialecticTool::new(
        bindings.collaborator.clone(),
        &bindings.user_id,
    )));
    if let Some(workspace) = &bindings.workspace {
        tools.extend(workspace_tools(workspace));
        tools.push(Box::new(shell::ShellTool::new(workspace.root())));
    }
    tools
}

/// Instantiate the named tool groups for a background task.
/// Unknown ids are logged and skipped.
pub fn create_tools_for_task(tool_ids: &[String], bindings: &ToolBindings) -> Vec<Box<dyn Tool>> {
    let mut tools: Vec<Box<dyn Tool>> = Vec::new();
    for id in tool_ids {
        match id.as_str() {
            "memory" => tools.extend(memory_tools(bindings)),
            "dialectic" => tools.push(Box::new(dialectic::DialecticTool::new(
                bindings.collaborator.clone(),
                &bindings.user_id,
            ))),
            "workspace" => {
                if let Some(workspace) = &bindings.workspace {
                    tools.extend(workspace_tools(workspace));
                }
            }
            other => warn!(tool_id = other, "unknown tool id in task definition — skipped"),
        }
    }
    tools
}

fn memory_tools(bindings: &ToolBindings) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(memory::ListMemoryBlocksTool::new(
            bindings.blocks.clone(),
            &bindings.user_id,
        )),
        Box::new(memory::ReadMemoryBlockTool::new(
            bindings.blocks.clone(),
            &bindings.user_id,
        )),
        Box::new(memory::ProposeMemoryEditTool::new(
            bindings.blocks.clone(),
            &bindings.user_id,
            &bindings.agent_id,
        )),
    ]
}

fn workspace_tools(workspace: &Workspace) -> Vec<Box<dyn Tool>> {
    vec![
        Box::new(workspace_files::ReadFileTool::new(workspace.clone())),
        Box::new(workspace_files::WriteFileTool::new(workspace.clone())),
        Box::new(workspace_files::DeleteFileTool::new(workspace.clone())),
        Box::new(workspace_files::ListFilesTool::new(workspace.clone())),
    ]
}

/// Convert a slice of tools to API-level tool definitions.
pub fn to_definitions(tools: &[Box<dyn Tool>]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|t| ToolDefinition {
            name: t.name().to_string(),
            description: t.description().to_string(),
            input_schema: t.input_schema(),
        })
        .collect()
}

/// Find and execute the named tool. Returns an error ToolResult if absent.
pub async fn execute_tool(
    tools: &[Box<dyn Tool>],
    name: &str,
    input: serde_json::Value,
) -> ToolResult {
    match tools.iter().find(|t| t.name() == name) {
        Some(tool) => tool.execute(input).await,
        None => ToolResult::error(format!("unknown tool: {name}")),
    }
}
