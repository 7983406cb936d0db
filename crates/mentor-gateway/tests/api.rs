//! End-to-end API tests against the assembled router, with a scripted LLM
//! provider standing in for the real one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;

use mentor_agent::collaborator::ConversationStoreClient;
use mentor_agent::persist::ConversationSink;
use mentor_agent::provider::{
    ChatRequest, ChatResponse, LlmProvider, ProviderError, StreamEnd, StreamEvent,
};
use mentor_agent::AgentRunner;
use mentor_background::{Scheduler, TaskExecutor, TaskRegistry, TaskRunStore};
use mentor_core::config::MentorConfig;
use mentor_gateway::app::{build_router, AppState};
use mentor_memory::ActivityTracker;
use mentor_store::BlockService;
use mentor_workspace::WorkspaceManager;

/// Replays one scripted event sequence per streaming call.
struct ScriptedProvider {
    scripts: Mutex<Vec<Vec<StreamEvent>>>,
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, _req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        unimplemented!("streaming only")
    }

    async fn send_stream(
        &self,
        _req: &ChatRequest,
        tx: mpsc::Sender<StreamEvent>,
    ) -> Result<(), ProviderError> {
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                vec![StreamEvent::Done(StreamEnd::stopped("end_turn"))]
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

fn make_app(dir: &tempfile::TempDir, scripts: Vec<Vec<StreamEvent>>) -> Router {
    let config = MentorConfig::default();
    let blocks = Arc::new(BlockService::new(dir.path()));
    let workspaces = Arc::new(WorkspaceManager::new(dir.path(), None, 1024 * 1024));
    let activity = Arc::new(
        ActivityTracker::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
    );
    let registry = Arc::new(
        TaskRegistry::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
    );
    let runs = Arc::new(
        TaskRunStore::new(rusqlite::Connection::open_in_memory().unwrap()).unwrap(),
    );

    let provider: Arc<dyn LlmProvider> = Arc::new(ScriptedProvider {
        scripts: Mutex::new(scripts),
    });
    let collaborator = Arc::new(ConversationStoreClient::new(&config.conversation_store));
    let sink = ConversationSink::start(collaborator.clone());

    let runner = Arc::new(AgentRunner::new(
        provider.clone(),
        blocks.clone(),
        workspaces.clone(),
        activity.clone(),
        collaborator.clone(),
        sink,
        "test-model".to_string(),
        1024,
    ));
    let executor = Arc::new(TaskExecutor::new(
        provider,
        blocks.clone(),
        workspaces.clone(),
        activity.clone(),
        collaborator,
        runs.clone(),
        "test-model".to_string(),
        1024,
    ));
    let scheduler = Arc::new(Scheduler::new(
        registry.clone(),
        executor,
        activity.clone(),
        60,
        8,
        Duration::from_secs(5),
    ));

    build_router(Arc::new(AppState {
        config,
        blocks,
        workspaces,
        activity,
        runner,
        registry,
        scheduler,
        runs,
    }))
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_reports_service() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir, Vec::new());

    let (status, body) = request(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "mentor");
}

#[tokio::test]
async fn block_crud_history_and_restore() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir, Vec::new());

    // Create via PUT.
    let (status, body) = request(
        &app,
        "PUT",
        "/users/u1/blocks/student",
        Some(serde_json::json!({"body": "The student likes math."})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"], "The student likes math.");
    assert_eq!(body["title"], "Student");

    // Update, then check history has both versions.
    request(
        &app,
        "PUT",
        "/users/u1/blocks/student",
        Some(serde_json::json!({"body": "Changed.", "message": "Second pass"})),
    )
    .await;
    let (status, body) = request(&app, "GET", "/users/u1/blocks/student/history", None).await;
    assert_eq!(status, StatusCode::OK);
    let versions = body["versions"].as_array().unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0]["is_current"], true);
    assert_eq!(versions[0]["message"], "Second pass");

    // Read at the old version, then restore it.
    let old_sha = versions[1]["commit_sha"].as_str().unwrap().to_string();
    let (status, body) = request(
        &app,
        "GET",
        &format!("/users/u1/blocks/student/versions/{old_sha}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"], "The student likes math.");

    let (status, body) = request(
        &app,
        "POST",
        "/users/u1/blocks/student/restore",
        Some(serde_json::json!({"commit_sha": old_sha})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["body"], "The student likes math.");

    // Unknown block and unknown version are 404s.
    let (status, _) = request(&app, "GET", "/users/u1/blocks/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = request(
        &app,
        "GET",
        "/users/u1/blocks/student/versions/0000000000000000000000000000000000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Delete.
    let (status, body) = request(&app, "DELETE", "/users/u1/blocks/student", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deleted"], true);
    let (status, _) = request(&app, "DELETE", "/users/u1/blocks/student", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn proposal_approve_flow_over_http() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir, Vec::new());

    request(
        &app,
        "PUT",
        "/users/u1/blocks/student",
        Some(serde_json::json!({"body": "The student likes math."})),
    )
    .await;

    // Agent proposes a full-body replacement.
    let (status, body) = request(
        &app,
        "POST",
        "/users/u1/blocks/student/propose",
        Some(serde_json::json!({
            "agent_id": "curator",
            "body": "The student loves mathematics.",
            "reasoning": "Student expressed stronger enthusiasm",
            "confidence": "high",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch_name"], "agent/u1/student");
    let diff_id = body["diff_id"].as_str().unwrap().to_string();

    // The block reports one pending diff; the listing shows old and new.
    let (_, body) = request(&app, "GET", "/users/u1/blocks/student", None).await;
    assert_eq!(body["pending_diffs"], 1);
    let (status, body) = request(&app, "GET", "/users/u1/blocks/student/diffs", None).await;
    assert_eq!(status, StatusCode::OK);
    let diffs = body.as_array().unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0]["id"], diff_id.as_str());
    assert_eq!(diffs[0]["old_value"], "The student likes math.");
    assert_eq!(diffs[0]["new_value"], "The student loves mathematics.");

    // Approve merges to main.
    let (status, body) = request(
        &app,
        "POST",
        &format!("/users/u1/blocks/student/diffs/{diff_id}/approve"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["approved"], true);
    assert_eq!(body["commit_sha"].as_str().unwrap().len(), 40);

    let (_, body) = request(&app, "GET", "/users/u1/blocks/student", None).await;
    assert_eq!(body["body"], "The student loves mathematics.");
    assert_eq!(body["pending_diffs"], 0);

    // A second approval of the same diff is stale.
    let (status, body) = request(
        &app,
        "POST",
        &format!("/users/u1/blocks/student/diffs/{diff_id}/approve"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PROPOSAL_STALE");

    // History: original write + proposal commit + approval merge.
    let (_, body) = request(&app, "GET", "/users/u1/blocks/student/history", None).await;
    assert_eq!(body["versions"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn conflicting_approval_fails_loud() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir, Vec::new());

    request(
        &app,
        "PUT",
        "/users/u1/blocks/student",
        Some(serde_json::json!({"body": "original"})),
    )
    .await;
    let (_, body) = request(
        &app,
        "POST",
        "/users/u1/blocks/student/propose",
        Some(serde_json::json!({
            "agent_id": "curator",
            "body": "agent version",
            "reasoning": "update",
        })),
    )
    .await;
    let diff_id = body["diff_id"].as_str().unwrap().to_string();

    // Main advances with a user edit before approval.
    request(
        &app,
        "PUT",
        "/users/u1/blocks/student",
        Some(serde_json::json!({"body": "user version"})),
    )
    .await;

    let (status, body) = request(
        &app,
        "POST",
        &format!("/users/u1/blocks/student/diffs/{diff_id}/approve"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "PROPOSAL_CONFLICT");

    // Rejecting resolves the stuck proposal.
    let (status, body) = request(
        &app,
        "POST",
        &format!("/users/u1/blocks/student/diffs/{diff_id}/reject"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["rejected"], true);
    let (_, body) = request(&app, "GET", "/users/u1/blocks/student/diffs", None).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn workspace_upload_download_delete() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(&dir, Vec::new());

    let put = Request::builder()
        .method("PUT")
        .uri("/users/u1/workspace/files/notes/plan.md")
        .body(Body::from("# Plan"))
        .unwrap();
    let response = app.clone().oneshot(put).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let meta: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert!(meta["hash"].as_str().unwrap().starts_with("sha256:"));
    assert_eq!(meta["size"], 6);

    // Listing includes it.
    let (status, body) = request(&app, "GET", "/users/u1/workspace/files", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["files"].as_array().unwrap().len(), 1);
    assert_eq!(body["total_size"], 6);

    // Download round-trips bytes with an inferred content type.
    let get = Request::builder()
        .method("GET")
        .uri("/users/u1/workspace/files/notes/plan.md")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(get).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/markdown"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&bytes[..], b"# Plan");

    // Escaping paths are rejected.
    let (status, body) = request(&app, "GET", "/users/u1/workspace/files/../escape.txt", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_PATH");

    let (status, _) = request(&app, "DELETE", "/users/u1/workspace/files/notes/plan.md", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = request(&app, "GET", "/users/u1/workspace/files/notes/plan.md", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn background_task_upsert_and_manual_run() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(
        &dir,
        vec![vec![
            StreamEvent::Text("Reviewed.".to_string()),
            StreamEvent::Done(StreamEnd::stopped("end_turn")),
        ]],
    );

    // Seed the block the task will read.
    request(
        &app,
        "PUT",
        "/users/u1/blocks/student",
        Some(serde_json::json!({"body": "The student likes math."})),
    )
    .await;

    let task = serde_json::json!({
        "name": "nightly_review",
        "system_prompt": "Review the student's progress.",
        "tools": ["memory"],
        "memory_blocks": ["student"],
        "trigger": {"type": "idle", "idle_minutes": 5, "cooldown_minutes": 60},
        "user_ids": ["u1"],
        "batch_size": 5,
        "max_turns": 10,
        "enabled": true,
    });
    let (status, body) = request(&app, "POST", "/background/tasks", Some(task)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "nightly_review");

    let (status, body) = request(&app, "GET", "/background/tasks", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Manual run is synchronous and returns a summary.
    let (status, body) = request(&app, "POST", "/background/tasks/nightly_review/run", None).await;
    assert_eq!(status, StatusCode::OK);
    let run_id = body["run_id"].as_str().unwrap().to_string();
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("completed with status: success"));

    // The run is retrievable by id and in the task's history.
    let (status, body) = request(&app, "GET", &format!("/background/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["trigger_type"], "manual");
    let (_, body) = request(&app, "GET", "/background/tasks/nightly_review/runs", None).await;
    assert_eq!(body.as_array().unwrap().len(), 1);

    // Unknown task names are 404s.
    let (status, body) = request(&app, "POST", "/background/tasks/ghost/run", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "TASK_NOT_FOUND");

    // Bad cron expressions are rejected at registration.
    let bad = serde_json::json!({
        "name": "bad_cron",
        "system_prompt": "x",
        "tools": [],
        "memory_blocks": [],
        "trigger": {"type": "cron", "schedule": "not a cron"},
        "user_ids": [],
    });
    let (status, body) = request(&app, "POST", "/background/tasks", Some(bad)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "INVALID_INPUT");
}

#[tokio::test]
async fn chat_stream_emits_events_and_seeds_blocks() {
    let dir = tempfile::tempdir().unwrap();
    let app = make_app(
        &dir,
        vec![vec![
            StreamEvent::Text("Hello".to_string()),
            StreamEvent::Text(" world".to_string()),
            StreamEvent::Done(StreamEnd::stopped("end_turn")),
        ]],
    );

    let req = Request::builder()
        .method("POST")
        .uri("/chat/stream")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "user_id": "u1",
                "chat_id": "c1",
                "messages": [{"role": "user", "content": "hi"}],
            })
            .to_string(),
        ))
        .unwrap();
    let response = app.clone().oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let text = String::from_utf8_lossy(&bytes);
    let frames: Vec<&str> = text
        .lines()
        .filter_map(|l| l.strip_prefix("data: "))
        .collect();
    assert_eq!(
        frames,
        vec![
            r#"{"type":"message","content":"Hello"}"#,
            r#"{"type":"message","content":" world"}"#,
            r#"{"type":"done"}"#,
        ]
    );

    // First contact seeded the welcome blocks.
    let (status, body) = request(&app, "GET", "/users/u1/blocks", None).await;
    assert_eq!(status, StatusCode::OK);
    let blocks = body.as_array().unwrap();
    assert_eq!(blocks.len(), 4);
    for block in blocks {
        assert!(!block["body"].as_str().unwrap().is_empty());
        assert_eq!(block["pending_diffs"], 0);
    }
}
