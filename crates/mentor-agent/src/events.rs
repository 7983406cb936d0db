//! The wire event vocabulary for chat streaming.
//!
//! A closed tagged sum: every provider chunk is classified into exactly one
//! of these or dropped. Serialized with a `type` discriminant so the SSE
//! layer can frame each event as one JSON object.

use serde::Serialize;

use crate::provider::StreamEvent;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Progress indicator, optionally carrying reasoning text.
    Status {
        content: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning: Option<String>,
    },
    /// Standalone reasoning content.
    Reasoning { content: String },
    /// A tool call transition: status is "started" or "completed".
    ToolCall { name: String, status: String },
    /// Incremental assistant text.
    Message { content: String },
    /// Orderly completion.
    Done,
    /// Terminal failure; the stream closes after this with no `done`.
    Error { message: String },
}

impl AgentEvent {
    pub fn tool_started(name: &str) -> Self {
        AgentEvent::ToolCall {
            name: name.to_string(),
            status: "started".to_string(),
        }
    }

    pub fn tool_completed(name: &str) -> Self {
        AgentEvent::ToolCall {
            name: name.to_string(),
            status: "completed".to_string(),
        }
    }
}

/// Classify a provider stream event into the wire vocabulary.
///
/// Total over the provider event set: chunks with no wire counterpart map to
/// None and are dropped (`Done` is handled by the runner itself since it
/// carries loop-control state).
pub fn classify(event: &StreamEvent) -> Option<AgentEvent> {
    match event {
        StreamEvent::Text(text) => Some(AgentEvent::Message {
            content: text.clone(),
        }),
        StreamEvent::Thinking(text) => Some(AgentEvent::Status {
            content: "Thinking...".to_string(),
            reasoning: Some(text.clone()),
        }),
        StreamEvent::ToolUse(call) => Some(AgentEvent::tool_started(&call.name)),
        StreamEvent::Error(message) => Some(AgentEvent::Error {
            message: message.clone(),
        }),
        StreamEvent::Done(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_string(&AgentEvent::Message {
            content: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"message","content":"hi"}"#);

        let json = serde_json::to_string(&AgentEvent::Done).unwrap();
        assert_eq!(json, r#"{"type":"done"}"#);

        let json = serde_json::to_string(&AgentEvent::tool_started("x")).unwrap();
        assert_eq!(json, r#"{"type":"tool_call","name":"x","status":"started"}"#);
    }

    #[test]
    fn status_omits_absent_reasoning() {
        let json = serde_json::to_string(&AgentEvent::Status {
            content: "Thinking...".to_string(),
            reasoning: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"status","content":"Thinking..."}"#);
    }

    #[test]
    fn classifier_maps_thinking_to_status() {
        let event = classify(&StreamEvent::Thinking("hmm".to_string())).unwrap();
        match event {
            AgentEvent::Status { content, reasoning } => {
                assert_eq!(content, "Thinking...");
                assert_eq!(reasoning.as_deref(), Some("hmm"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn classifier_drops_done() {
        use crate::provider::StreamEnd;
        assert!(classify(&StreamEvent::Done(StreamEnd::stopped("end_turn"))).is_none());
    }
}
