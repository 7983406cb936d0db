//! One LLM turn, end to end.
//!
//! Assemble instructions from memory + workspace + per-chat system text,
//! stream the provider call, execute tool calls between iterations, map
//! everything to the wire event vocabulary, persist best-effort, and stamp
//! user activity after `done`.

use std::sync::Arc;

use mentor_core::types::ChatMessage;
use mentor_memory::{build_memory_context, ensure_welcome_blocks, ActivityTracker};
use mentor_store::BlockService;
use mentor_workspace::WorkspaceManager;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::collaborator::ConversationStoreClient;
use crate::events::{classify, AgentEvent};
use crate::persist::ConversationSink;
use crate::prompt;
use crate::provider::{ChatRequest, LlmProvider, StreamEvent, ToolCall};
use crate::tools::{self, ToolBindings};

/// Cap on provider round-trips within one turn.
const MAX_TOOL_ITERATIONS: usize = 25;
/// Agent identity recorded on proposals created during chat turns.
const FOREGROUND_AGENT_ID: &str = "mentor";

/// Inbound turn: the final message's role must be `user`.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub user_id: String,
    pub chat_id: String,
    pub messages: Vec<ChatMessage>,
}

pub struct AgentRunner {
    provider: Arc<dyn LlmProvider>,
    blocks: Arc<BlockService>,
    workspaces: Arc<WorkspaceManager>,
    activity: Arc<ActivityTracker>,
    collaborator: Arc<ConversationStoreClient>,
    sink: Arc<ConversationSink>,
    model: String,
    max_tokens: u32,
}

impl AgentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        blocks: Arc<BlockService>,
        workspaces: Arc<WorkspaceManager>,
        activity: Arc<ActivityTracker>,
        collaborator: Arc<ConversationStoreClient>,
        sink: Arc<ConversationSink>,
        model: String,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            blocks,
            workspaces,
            activity,
            collaborator,
            sink,
            model,
            max_tokens,
        }
    }

    /// Run one turn, emitting wire events on `tx`.
    ///
    /// Emits `done` on orderly completion. A mid-stream failure emits
    /// `error` and closes with no trailing `done`. Client disconnect
    /// cancels via `cancel` at the next suspension point.
    pub async fn run_turn(
        &self,
        req: TurnRequest,
        tx: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) {
        let (per_chat_system, history) = prompt::extract_system_message(&req.messages);

        let workspace = match self.workspaces.for_user(&req.user_id) {
            Ok(ws) => ws,
            Err(e) => {
                warn!(user_id = %req.user_id, error = %e, "workspace resolution failed");
                let _ = tx.send(AgentEvent::Error { message: e.to_string() }).await;
                return;
            }
        };
        let claude_md = workspace.claude_md();

        // Seed welcome blocks for new users, then build the memory section.
        // Neither failure aborts the turn.
        let memory_context = match ensure_welcome_blocks(&self.blocks, &req.user_id).await {
            Ok(is_new) => {
                if is_new {
                    info!(user_id = %req.user_id, "new user seeded with welcome blocks");
                }
                build_memory_context(&self.blocks, &req.user_id, None)
                    .await
                    .unwrap_or_else(|e| {
                        warn!(user_id = %req.user_id, error = %e, "memory context load failed");
                        String::new()
                    })
            }
            Err(e) => {
                warn!(user_id = %req.user_id, error = %e, "welcome block init failed");
                String::new()
            }
        };

        let instructions = prompt::build_instructions(
            per_chat_system.as_deref(),
            workspace.root(),
            claude_md.as_deref(),
            &memory_context,
        );
        let turn_prompt = prompt::format_history(&history);

        // Persist the user's message before streaming begins (best-effort).
        if let Some(last) = history.last() {
            self.sink.enqueue(&req.user_id, &req.chat_id, &last.content, true);
        }

        let bindings = ToolBindings {
            user_id: req.user_id.clone(),
            agent_id: FOREGROUND_AGENT_ID.to_string(),
            blocks: self.blocks.clone(),
            workspace: Some(workspace),
            collaborator: self.collaborator.clone(),
        };
        let turn_tools = tools::foreground_tools(&bindings);

        let mut raw_messages =
            vec![serde_json::json!({ "role": "user", "content": turn_prompt })];
        let mut full_response = String::new();

        for iteration in 0..MAX_TOOL_ITERATIONS {
            let request = ChatRequest {
                model: self.model.clone(),
                system: instructions.clone(),
                messages: Vec::new(),
                max_tokens: self.max_tokens,
                tools: tools::to_definitions(&turn_tools),
                raw_messages: Some(raw_messages.clone()),
            };

            let outcome = self
                .stream_one_iteration(&request, &tx, &cancel, &mut full_response)
                .await;

            let (stop_reason, iteration_text, calls) = match outcome {
                IterationOutcome::Finished {
                    stop_reason,
                    text,
                    calls,
                } => (stop_reason, text, calls),
                IterationOutcome::Aborted => return,
            };

            if stop_reason == "tool_use" && !calls.is_empty() {
                debug!(iteration, count = calls.len(), "executing tool calls");
                raw_messages.push(assistant_turn(&iteration_text, &calls));

                let mut result_blocks = Vec::new();
                for call in &calls {
                    let result = tools::execute_tool(&turn_tools, &call.name, call.input.clone()).await;
                    if tx.send(AgentEvent::tool_completed(&call.name)).await.is_err() {
                        return;
                    }
                    result_blocks.push(serde_json::json!({
                        "type": "tool_result",
                        "tool_use_id": call.id,
                        "content": result.content,
                        "is_error": result.is_error,
                    }));
                }
                raw_messages.push(serde_json::json!({
                    "role": "user",
                    "content": result_blocks,
                }));
                continue;
            }

            // Orderly completion.
            let _ = tx.send(AgentEvent::Done).await;
            self.finish_turn(&req, &full_response);
            return;
        }

        warn!(user_id = %req.user_id, max = MAX_TOOL_ITERATIONS, "turn hit tool iteration cap");
        let _ = tx.send(AgentEvent::Done).await;
        self.finish_turn(&req, &full_response);
    }

    /// Drive one provider stream to its Done/Error, forwarding wire events.
    async fn stream_one_iteration(
        &self,
        request: &ChatRequest,
        tx: &mpsc::Sender<AgentEvent>,
        cancel: &CancellationToken,
        full_response: &mut String,
    ) -> IterationOutcome {
        let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(64);
        let provider = self.provider.clone();
        let request = request.clone();
        tokio::spawn(async move {
            if let Err(e) = provider.send_stream(&request, stream_tx.clone()).await {
                let _ = stream_tx.send(StreamEvent::Error(e.to_string())).await;
            }
        });

        let mut iteration_text = String::new();
        let mut calls: Vec<ToolCall> = Vec::new();

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("turn cancelled by client disconnect");
                    return IterationOutcome::Aborted;
                }
                event = stream_rx.recv() => event,
            };
            let Some(event) = event else {
                // Provider task ended without Done — treat as failure.
                let _ = tx
                    .send(AgentEvent::Error {
                        message: "stream ended unexpectedly".to_string(),
                    })
                    .await;
                return IterationOutcome::Aborted;
            };

            match &event {
                StreamEvent::Text(text) => {
                    iteration_text.push_str(text);
                    full_response.push_str(text);
                }
                StreamEvent::ToolUse(call) => {
                    calls.push(call.clone());
                }
                StreamEvent::Done(end) => {
                    return IterationOutcome::Finished {
                        stop_reason: end.stop_reason.clone(),
                        text: iteration_text,
                        calls,
                    };
                }
                StreamEvent::Error(_) | StreamEvent::Thinking(_) => {}
            }

            if let Some(wire_event) = classify(&event) {
                let is_error = matches!(wire_event, AgentEvent::Error { .. });
                if tx.send(wire_event).await.is_err() {
                    return IterationOutcome::Aborted;
                }
                if is_error {
                    // Error closes the stream with no trailing done.
                    return IterationOutcome::Aborted;
                }
            }
        }
    }

    /// Post-`done` bookkeeping: assistant persistence and the activity
    /// stamp. Neither may fail the turn.
    fn finish_turn(&self, req: &TurnRequest, full_response: &str) {
        if !full_response.is_empty() {
            self.sink
                .enqueue(&req.user_id, &req.chat_id, full_response, false);
        }
        if let Err(e) = self
            .activity
            .update_user_activity(&req.user_id, chrono::Utc::now())
        {
            warn!(user_id = %req.user_id, error = %e, "activity tracking failed");
        }
    }
}

enum IterationOutcome {
    Finished {
        stop_reason: String,
        text: String,
        calls: Vec<ToolCall>,
    },
    Aborted,
}

/// Build the assistant turn content blocks: any text plus the tool_use
/// blocks the model produced.
fn assistant_turn(text: &str, calls: &[ToolCall]) -> serde_json::Value {
    let mut content: Vec<serde_json::Value> = Vec::new();
    if !text.is_empty() {
        content.push(serde_json::json!({ "type": "text", "text": text }));
    }
    for call in calls {
        content.push(serde_json::json!({
            "type": "tool_use",
            "id": call.id,
            "name": call.name,
            "input": call.input,
        }));
    }
    serde_json::json!({ "role": "assistant", "content": content })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mentor_core::config::ConversationStoreConfig;
    use std::sync::Mutex;

    /// Provider fake: replays one scripted event sequence per send_stream
    /// call.
    struct ScriptedProvider {
        scripts: Mutex<Vec<Vec<StreamEvent>>>,
    }

    impl ScriptedProvider {
        fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            _req: &ChatRequest,
        ) -> Result<crate::provider::ChatResponse, crate::provider::ProviderError> {
            unimplemented!("streaming only")
        }

        async fn send_stream(
            &self,
            _req: &ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), crate::provider::ProviderError> {
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() {
                    Vec::new()
                } else {
                    scripts.remove(0)
                }
            };
            for event in script {
                if tx.send(event).await.is_err() {
                    break;
                }
            }
            Ok(())
        }
    }

    fn done(stop_reason: &str) -> StreamEvent {
        StreamEvent::Done(crate::provider::StreamEnd::stopped(stop_reason))
    }

    fn tool_use(id: &str, name: &str, input: serde_json::Value) -> StreamEvent {
        StreamEvent::ToolUse(ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input,
        })
    }

    fn make_runner(
        dir: &tempfile::TempDir,
        scripts: Vec<Vec<StreamEvent>>,
    ) -> (AgentRunner, Arc<ActivityTracker>) {
        let blocks = Arc::new(BlockService::new(dir.path()));
        let workspaces = Arc::new(WorkspaceManager::new(dir.path(), None, 10 * 1024 * 1024));
        let activity = Arc::new(
            ActivityTracker::new(rusqlite_conn()).expect("tracker"),
        );
        let collaborator = Arc::new(ConversationStoreClient::new(
            &ConversationStoreConfig::default(),
        ));
        let sink = ConversationSink::start(collaborator.clone());
        let runner = AgentRunner::new(
            Arc::new(ScriptedProvider::new(scripts)),
            blocks,
            workspaces,
            activity.clone(),
            collaborator,
            sink,
            "test-model".to_string(),
            1024,
        );
        (runner, activity)
    }

    fn rusqlite_conn() -> rusqlite::Connection {
        rusqlite::Connection::open_in_memory().unwrap()
    }

    fn turn(content: &str) -> TurnRequest {
        TurnRequest {
            user_id: "u1".to_string(),
            chat_id: "c1".to_string(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: content.to_string(),
            }],
        }
    }

    async fn collect_events(runner: &AgentRunner, req: TurnRequest) -> Vec<String> {
        let (tx, mut rx) = mpsc::channel(64);
        runner.run_turn(req, tx, CancellationToken::new()).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(serde_json::to_string(&event).unwrap());
        }
        events
    }

    #[tokio::test]
    async fn event_contract_for_plain_stream() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, activity) = make_runner(
            &dir,
            vec![vec![
                StreamEvent::Thinking("Thinking".to_string()),
                tool_use("t1", "x", serde_json::json!({})),
                StreamEvent::Text("Hello".to_string()),
                StreamEvent::Text(" world".to_string()),
                done("end_turn"),
            ]],
        );

        let events = collect_events(&runner, turn("hi")).await;
        assert_eq!(
            events,
            vec![
                r#"{"type":"status","content":"Thinking...","reasoning":"Thinking"}"#,
                r#"{"type":"tool_call","name":"x","status":"started"}"#,
                r#"{"type":"message","content":"Hello"}"#,
                r#"{"type":"message","content":" world"}"#,
                r#"{"type":"done"}"#,
            ]
        );
        // No duplicate of the accumulated text appears anywhere.
        let full: Vec<_> = events.iter().filter(|e| e.contains("Hello world")).collect();
        assert!(full.is_empty());

        // Activity stamped after done.
        assert!(activity.get_last_active("u1").unwrap().is_some());
    }

    #[tokio::test]
    async fn tool_loop_executes_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = make_runner(
            &dir,
            vec![
                vec![
                    tool_use("t1", "list_memory_blocks", serde_json::json!({})),
                    done("tool_use"),
                ],
                vec![StreamEvent::Text("All set.".to_string()), done("end_turn")],
            ],
        );

        let events = collect_events(&runner, turn("check my memory")).await;
        assert_eq!(
            events,
            vec![
                r#"{"type":"tool_call","name":"list_memory_blocks","status":"started"}"#,
                r#"{"type":"tool_call","name":"list_memory_blocks","status":"completed"}"#,
                r#"{"type":"message","content":"All set."}"#,
                r#"{"type":"done"}"#,
            ]
        );
    }

    #[tokio::test]
    async fn error_closes_stream_without_done() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = make_runner(
            &dir,
            vec![vec![
                StreamEvent::Text("partial".to_string()),
                StreamEvent::Error("provider blew up".to_string()),
            ]],
        );

        let events = collect_events(&runner, turn("hi")).await;
        assert_eq!(events.len(), 2);
        assert!(events[0].contains("partial"));
        assert!(events[1].contains(r#""type":"error""#));
        assert!(!events.iter().any(|e| e.contains(r#""type":"done""#)));
    }

    #[tokio::test]
    async fn first_contact_seeds_welcome_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = make_runner(
            &dir,
            vec![vec![StreamEvent::Text("Welcome!".to_string()), done("end_turn")]],
        );

        let events = collect_events(&runner, turn("hi")).await;
        assert!(events.last().unwrap().contains("done"));

        let blocks = BlockService::new(dir.path());
        let labels: Vec<String> = blocks
            .list_blocks("u1")
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.label)
            .collect();
        assert_eq!(
            labels,
            vec!["ai_partnership", "onboarding_progress", "origin_story", "tech_relationship"]
        );
    }
}
