//! Tool: dialectic query — ask the conversation-store collaborator a
//! free-form question about the student and get an insight back.

use std::sync::Arc;

use async_trait::async_trait;

use crate::collaborator::ConversationStoreClient;

use super::{Tool, ToolResult};

pub struct DialecticTool {
    collaborator: Arc<ConversationStoreClient>,
    user_id: String,
}

impl DialecticTool {
    pub fn new(collaborator: Arc<ConversationStoreClient>, user_id: &str) -> Self {
        Self {
            collaborator,
            user_id: user_id.to_string(),
        }
    }
}

#[async_trait]
impl Tool for DialecticTool {
    fn name(&self) -> &str {
        "query_student_insight"
    }

    fn description(&self) -> &str {
        "Ask a free-form question about the student, answered from their \
         conversation history (e.g. \"What topics frustrate this student?\"). \
         Returns an insight string."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "question": {
                    "type": "string",
                    "description": "The question to ask about the student."
                }
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, input: serde_json::Value) -> ToolResult {
        let Some(question) = input.get("question").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: question");
        };

        if !self.collaborator.is_configured() {
            return ToolResult::success(
                "Insight queries are not available right now (no conversation \
                 store configured).",
            );
        }

        match self.collaborator.query_dialectic(&self.user_id, question).await {
            Some(response) => ToolResult::success(response.insight),
            None => ToolResult::error("Insight query failed — try again later."),
        }
    }
}
