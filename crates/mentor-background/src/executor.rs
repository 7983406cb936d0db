//! Batched concurrent task execution.

use std::sync::Arc;

use chrono::Utc;
use mentor_agent::collaborator::ConversationStoreClient;
use mentor_agent::provider::{ChatRequest, LlmProvider, StreamEvent, ToolCall};
use mentor_agent::tools::{self, ToolBindings};
use mentor_memory::{build_memory_context, ActivityTracker};
use mentor_store::BlockService;
use mentor_workspace::WorkspaceManager;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::runs::TaskRunStore;
use crate::types::{BackgroundTask, RunStatus, TaskRun, TriggerType, UserRunResult};

/// Fixed driver prompt for every background run.
const DRIVER_PROMPT: &str =
    "Execute your background task now. Review the student context and take appropriate action.";

pub struct TaskExecutor {
    provider: Arc<dyn LlmProvider>,
    blocks: Arc<BlockService>,
    workspaces: Arc<WorkspaceManager>,
    activity: Arc<ActivityTracker>,
    collaborator: Arc<ConversationStoreClient>,
    runs: Arc<TaskRunStore>,
    model: String,
    max_tokens: u32,
}

impl TaskExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        blocks: Arc<BlockService>,
        workspaces: Arc<WorkspaceManager>,
        activity: Arc<ActivityTracker>,
        collaborator: Arc<ConversationStoreClient>,
        runs: Arc<TaskRunStore>,
        model: String,
        max_tokens: u32,
    ) -> Self {
        Self {
            provider,
            blocks,
            workspaces,
            activity,
            collaborator,
            runs,
            model,
            max_tokens,
        }
    }

    /// Execute a task for its users (or an override subset), in batch
    /// windows of `task.batch_size`. Within a window users run concurrently;
    /// windows are strictly sequential. The persisted run record is updated
    /// after every window and sealed at the end.
    pub async fn execute_task(
        &self,
        task: &BackgroundTask,
        trigger_type: TriggerType,
        user_ids: Option<Vec<String>>,
        cancel: CancellationToken,
    ) -> TaskRun {
        let run_id = Uuid::new_v4().to_string();
        let users_to_process = user_ids.unwrap_or_else(|| task.user_ids.clone());

        let mut run = TaskRun {
            id: run_id.clone(),
            task_name: task.name.clone(),
            trigger_type,
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            user_results: Vec::new(),
            error: None,
        };
        if let Err(e) = self.runs.create_run(&run) {
            warn!(run_id = %run_id, error = %e, "failed to persist initial run record");
        }

        info!(
            run_id = %run_id,
            task = %task.name,
            user_count = users_to_process.len(),
            batch_size = task.batch_size,
            "task run started"
        );

        let batch_size = task.batch_size.max(1);
        for batch in users_to_process.chunks(batch_size) {
            if cancel.is_cancelled() {
                warn!(run_id = %run_id, task = %task.name, "task run cancelled between batches");
                break;
            }

            let futures: Vec<_> = batch
                .iter()
                .map(|user_id| self.run_for_user(task, user_id, cancel.clone()))
                .collect();
            let batch_results = futures_util::future::join_all(futures).await;
            run.user_results.extend(batch_results);

            if let Err(e) = self.runs.update_run(&run) {
                warn!(run_id = %run_id, error = %e, "failed to update run record");
            }
        }

        let statuses: Vec<RunStatus> = run.user_results.iter().map(|r| r.status).collect();
        run.status = if statuses.iter().all(|s| *s == RunStatus::Success) {
            RunStatus::Success
        } else if statuses.iter().all(|s| *s == RunStatus::Failed) {
            RunStatus::Failed
        } else {
            RunStatus::Partial
        };
        run.completed_at = Some(Utc::now());

        if let Err(e) = self.runs.update_run(&run) {
            warn!(run_id = %run_id, error = %e, "failed to seal run record");
        }

        info!(
            run_id = %run_id,
            task = %task.name,
            status = %run.status,
            "task run completed"
        );
        run
    }

    /// Run the task's agent for a single user: build the memory context,
    /// bind the task's tool set, stream the LLM with the driver prompt, and
    /// count chunks against `max_turns`.
    async fn run_for_user(
        &self,
        task: &BackgroundTask,
        user_id: &str,
        cancel: CancellationToken,
    ) -> UserRunResult {
        let started_at = Utc::now();
        info!(task = %task.name, user_id, "user run started");

        match self.drive_user_agent(task, user_id, cancel).await {
            Ok((turns_used, proposals_created)) => {
                // Cooldown ledger entry for idle-trigger filtering.
                if let Err(e) =
                    self.activity
                        .record_task_run_for_user(user_id, &task.name, Utc::now())
                {
                    warn!(task = %task.name, user_id, error = %e, "cooldown ledger write failed");
                }

                info!(task = %task.name, user_id, turns_used, "user run completed");
                UserRunResult {
                    user_id: user_id.to_string(),
                    status: RunStatus::Success,
                    started_at,
                    completed_at: Some(Utc::now()),
                    turns_used,
                    error: None,
                    proposals_created,
                }
            }
            Err(error) => {
                warn!(task = %task.name, user_id, error = %error, "user run failed");
                UserRunResult {
                    user_id: user_id.to_string(),
                    status: RunStatus::Failed,
                    started_at,
                    completed_at: Some(Utc::now()),
                    turns_used: 0,
                    error: Some(error),
                    proposals_created: 0,
                }
            }
        }
    }

    /// The per-user agent loop. Returns (turns_used, proposals_created).
    async fn drive_user_agent(
        &self,
        task: &BackgroundTask,
        user_id: &str,
        cancel: CancellationToken,
    ) -> Result<(usize, usize), String> {
        let memory_context = if task.memory_blocks.is_empty() {
            String::new()
        } else {
            build_memory_context(&self.blocks, user_id, Some(&task.memory_blocks))
                .await
                .map_err(|e| e.to_string())?
        };

        let mut instructions = task.system_prompt.clone();
        if !memory_context.is_empty() {
            instructions.push_str("\n\n---\n\n# Student Context\n\n");
            instructions.push_str(&memory_context);
        }

        let bindings = ToolBindings {
            user_id: user_id.to_string(),
            agent_id: task.name.clone(),
            blocks: self.blocks.clone(),
            workspace: self.workspaces.for_user(user_id).ok(),
            collaborator: self.collaborator.clone(),
        };
        let task_tools = tools::create_tools_for_task(&task.tools, &bindings);

        let mut raw_messages =
            vec![serde_json::json!({ "role": "user", "content": DRIVER_PROMPT })];
        let mut turns_used = 0usize;
        let mut proposals_created = 0usize;

        loop {
            let request = ChatRequest {
                model: self.model.clone(),
                system: instructions.clone(),
                messages: Vec::new(),
                max_tokens: self.max_tokens,
                tools: tools::to_definitions(&task_tools),
                raw_messages: Some(raw_messages.clone()),
            };

            let (stream_tx, mut stream_rx) = mpsc::channel::<StreamEvent>(64);
            let provider = self.provider.clone();
            let req = request.clone();
            tokio::spawn(async move {
                if let Err(e) = provider.send_stream(&req, stream_tx.clone()).await {
                    let _ = stream_tx.send(StreamEvent::Error(e.to_string())).await;
                }
            });

            let mut iteration_text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut stop_reason = String::new();
            let mut turn_limit_hit = false;

            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return Err("cancelled".to_string()),
                    event = stream_rx.recv() => event,
                };
                let Some(event) = event else {
                    return Err("stream ended unexpectedly".to_string());
                };

                turns_used += 1;
                if turns_used >= task.max_turns {
                    warn!(
                        task = %task.name,
                        user_id,
                        max_turns = task.max_turns,
                        "user run hit turn limit"
                    );
                    turn_limit_hit = true;
                    break;
                }

                match event {
                    StreamEvent::Text(text) => iteration_text.push_str(&text),
                    StreamEvent::ToolUse(call) => calls.push(call),
                    StreamEvent::Done(end) => {
                        stop_reason = end.stop_reason;
                        break;
                    }
                    StreamEvent::Error(message) => return Err(message),
                    StreamEvent::Thinking(_) => {}
                }
            }

            if turn_limit_hit || stop_reason != "tool_use" || calls.is_empty() {
                return Ok((turns_used, proposals_created));
            }

            // Thread tool results back and continue the loop.
            let mut assistant_content: Vec<serde_json::Value> = Vec::new();
            if !iteration_text.is_empty() {
                assistant_content.push(serde_json::json!({
                    "type": "text",
                    "text": iteration_text,
                }));
            }
            for call in &calls {
                assistant_content.push(serde_json::json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input,
                }));
            }
            raw_messages.push(serde_json::json!({
                "role": "assistant",
                "content": assistant_content,
            }));

            let mut result_blocks = Vec::new();
            for call in &calls {
                let result = tools::execute_tool(&task_tools, &call.name, call.input.clone()).await;
                if call.name == "propose_memory_edit" && !result.is_error {
                    proposals_created += 1;
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
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mentor_core::config::ConversationStoreConfig;
    use std::sync::Mutex;

    /// Provider fake: scripts are consumed per send_stream call; an entry of
    /// None makes that call fail.
    struct ScriptedProvider {
        scripts: Mutex<Vec<Option<Vec<StreamEvent>>>>,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn send(
            &self,
            _req: &ChatRequest,
        ) -> Result<mentor_agent::provider::ChatResponse, mentor_agent::provider::ProviderError>
        {
            unimplemented!("streaming only")
        }

        async fn send_stream(
            &self,
            _req: &ChatRequest,
            tx: mpsc::Sender<StreamEvent>,
        ) -> Result<(), mentor_agent::provider::ProviderError> {
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() {
                    Some(Vec::new())
                } else {
                    scripts.remove(0)
                }
            };
            match script {
                Some(events) => {
                    for event in events {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(())
                }
                None => Err(mentor_agent::provider::ProviderError::Api {
                    status: 500,
                    message: "scripted failure".to_string(),
                }),
            }
        }
    }

    fn done(stop_reason: &str) -> StreamEvent {
        StreamEvent::Done(mentor_agent::provider::StreamEnd::stopped(stop_reason))
    }

    fn text(t: &str) -> StreamEvent {
        StreamEvent::Text(t.to_string())
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        executor: TaskExecutor,
        activity: Arc<ActivityTracker>,
        runs: Arc<TaskRunStore>,
        blocks: Arc<BlockService>,
    }

    async fn make_fixture(scripts: Vec<Option<Vec<StreamEvent>>>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let blocks = Arc::new(BlockService::new(dir.path()));
        blocks.init_user("u1").await.unwrap();
        blocks
            .write_block("u1", "student", "The student likes math.", None, "user", None, None)
            .await
            .unwrap();

        let workspaces = Arc::new(WorkspaceManager::new(dir.path(), None, 1024 * 1024));
        let activity = Arc::new(
            ActivityTracker::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );
        let collaborator = Arc::new(ConversationStoreClient::new(
            &ConversationStoreConfig::default(),
        ));
        let runs = Arc::new(
            TaskRunStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
        );

        let executor = TaskExecutor::new(
            Arc::new(ScriptedProvider {
                scripts: Mutex::new(scripts),
            }),
            blocks.clone(),
            workspaces,
            activity.clone(),
            collaborator,
            runs.clone(),
            "test-model".to_string(),
            1024,
        );
        Fixture {
            _dir: dir,
            executor,
            activity,
            runs,
            blocks,
        }
    }

    fn make_task(users: &[&str]) -> BackgroundTask {
        BackgroundTask {
            name: "review".to_string(),
            system_prompt: "Review the student.".to_string(),
            tools: vec!["memory".to_string()],
            memory_blocks: vec!["student".to_string()],
            trigger: crate::types::Trigger::Idle {
                idle_minutes: 5,
                cooldown_minutes: 60,
            },
            user_ids: users.iter().map(|s| s.to_string()).collect(),
            batch_size: 5,
            max_turns: 10,
            enabled: true,
        }
    }

    #[tokio::test]
    async fn successful_run_records_cooldown_and_seals_record() {
        let fixture = make_fixture(vec![Some(vec![text("Reviewed."), done("end_turn")])]).await;
        let run = fixture
            .executor
            .execute_task(&make_task(&["u1"]), TriggerType::Manual, None, CancellationToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.user_results.len(), 1);
        assert!(run.user_results[0].turns_used > 0);
        assert!(run.completed_at.is_some());

        // Cooldown ledger has the entry, so an idle re-fire is suppressed.
        fixture
            .activity
            .update_user_activity("u1", Utc::now() - chrono::Duration::minutes(30))
            .unwrap();
        assert!(fixture
            .activity
            .get_users_idle_for(5, "review", 60)
            .unwrap()
            .is_empty());

        // The persisted record matches.
        let stored = fixture.runs.get_run(&run.id).unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn provider_failure_rolls_up_as_failed() {
        let fixture = make_fixture(vec![None]).await;
        let run = fixture
            .executor
            .execute_task(&make_task(&["u1"]), TriggerType::Cron, None, CancellationToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.user_results[0].error.as_deref().unwrap().contains("scripted failure"));
    }

    #[tokio::test]
    async fn mixed_results_roll_up_as_partial() {
        let fixture = make_fixture(vec![
            Some(vec![text("ok"), done("end_turn")]),
            None,
        ])
        .await;
        let mut task = make_task(&["u1", "u2"]);
        task.batch_size = 1; // sequential batches keep script order deterministic
        let run = fixture
            .executor
            .execute_task(&task, TriggerType::Cron, None, CancellationToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Partial);
        assert_eq!(run.user_results.len(), 2);
    }

    #[tokio::test]
    async fn turn_limit_aborts_the_stream() {
        let many: Vec<StreamEvent> = (0..20).map(|i| text(&format!("chunk{i}"))).collect();
        let fixture = make_fixture(vec![Some(many)]).await;
        let mut task = make_task(&["u1"]);
        task.max_turns = 3;
        let run = fixture
            .executor
            .execute_task(&task, TriggerType::Manual, None, CancellationToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.user_results[0].turns_used, 3);
    }

    #[tokio::test]
    async fn tool_loop_counts_proposals() {
        let fixture = make_fixture(vec![
            Some(vec![
                StreamEvent::ToolUse(ToolCall {
                    id: "t1".to_string(),
                    name: "propose_memory_edit".to_string(),
                    input: serde_json::json!({
                        "block_label": "student",
                        "old_string": "likes math",
                        "new_string": "loves mathematics",
                        "reasoning": "observed enthusiasm",
                    }),
                }),
                done("tool_use"),
            ]),
            Some(vec![text("Proposed an update."), done("end_turn")]),
        ])
        .await;

        let run = fixture
            .executor
            .execute_task(&make_task(&["u1"]), TriggerType::Idle, None, CancellationToken::new())
            .await;

        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.user_results[0].proposals_created, 1);
        assert!(fixture
            .blocks
            .get_proposal_diff("u1", "student")
            .await
            .unwrap()
            .is_some());
    }
}
