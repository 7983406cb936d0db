//! Memory block endpoints: CRUD, history, restore, and the proposal
//! review workflow.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use mentor_core::types::Confidence;
use mentor_core::MentorError;
use mentor_store::diffs::DiffOperation;
use mentor_store::{MemoryBlock, VersionInfo};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Serialize)]
pub struct BlockResponse {
    pub user_id: String,
    pub label: String,
    pub title: Option<String>,
    pub body: String,
    pub schema_ref: Option<String>,
    pub updated_at: Option<String>,
    pub pending_diffs: usize,
}

impl BlockResponse {
    fn from_block(block: MemoryBlock, pending_diffs: usize) -> Self {
        Self {
            user_id: block.user_id,
            label: block.label,
            title: block.title,
            body: block.body,
            schema_ref: block.schema_ref,
            updated_at: block.updated_at,
            pending_diffs,
        }
    }
}

#[derive(Deserialize)]
pub struct BlockUpdateRequest {
    pub body: String,
    pub title: Option<String>,
    pub schema_ref: Option<String>,
    pub message: Option<String>,
}

#[derive(Serialize)]
pub struct VersionResponse {
    pub commit_sha: String,
    pub message: String,
    pub author: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub is_current: bool,
}

impl From<VersionInfo> for VersionResponse {
    fn from(v: VersionInfo) -> Self {
        Self {
            commit_sha: v.commit_sha,
            message: v.message,
            author: v.author,
            timestamp: v.timestamp,
            is_current: v.is_current,
        }
    }
}

#[derive(Serialize)]
pub struct VersionListResponse {
    pub versions: Vec<VersionResponse>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Deserialize)]
pub struct RestoreRequest {
    pub commit_sha: String,
}

#[derive(Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub commit_sha: String,
}

/// The active proposal for a block, shaped for the review UI.
#[derive(Serialize)]
pub struct ProposalDiffResponse {
    pub id: String,
    pub block: String,
    pub field: Option<String>,
    pub operation: String,
    pub reasoning: String,
    pub confidence: Confidence,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub agent_id: String,
    pub old_value: String,
    pub new_value: String,
}

#[derive(Deserialize)]
pub struct ProposeEditRequest {
    pub agent_id: String,
    pub body: String,
    pub reasoning: String,
    #[serde(default)]
    pub confidence: Confidence,
}

#[derive(Serialize)]
pub struct ProposeEditResponse {
    pub branch_name: String,
    pub diff_id: String,
    pub success: bool,
}

#[derive(Serialize)]
pub struct ApproveResponse {
    pub approved: bool,
    pub commit_sha: String,
}

#[derive(Serialize)]
pub struct RejectResponse {
    pub rejected: bool,
}

/// GET /users/{user_id}/blocks
pub async fn list_blocks(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Json<Vec<BlockResponse>>> {
    let blocks = state.blocks.list_blocks(&user_id).await?;
    let proposals = state.blocks.list_proposals(&user_id).await?;

    let responses = blocks
        .into_iter()
        .map(|b| {
            let pending = proposals.iter().filter(|p| p.block_label == b.label).count();
            BlockResponse::from_block(b, pending)
        })
        .collect();
    Ok(Json(responses))
}

/// GET /users/{user_id}/blocks/{label}
pub async fn get_block(
    State(state): State<Arc<AppState>>,
    Path((user_id, label)): Path<(String, String)>,
) -> ApiResult<Json<BlockResponse>> {
    let block = state
        .blocks
        .get_block(&user_id, &label)
        .await?
        .ok_or(MentorError::BlockNotFound { label: label.clone() })?;
    let pending = state
        .blocks
        .get_proposal_diff(&user_id, &label)
        .await?
        .map(|_| 1)
        .unwrap_or(0);
    Ok(Json(BlockResponse::from_block(block, pending)))
}

/// PUT /users/{user_id}/blocks/{label} — direct user edit.
pub async fn update_block(
    State(state): State<Arc<AppState>>,
    Path((user_id, label)): Path<(String, String)>,
    Json(req): Json<BlockUpdateRequest>,
) -> ApiResult<Json<BlockResponse>> {
    state
        .blocks
        .write_block(
            &user_id,
            &label,
            &req.body,
            req.message.as_deref(),
            "user",
            req.schema_ref.as_deref(),
            req.title.as_deref(),
        )
        .await?;

    let block = state
        .blocks
        .get_block(&user_id, &label)
        .await?
        .ok_or_else(|| MentorError::Internal("failed to re-read updated block".to_string()))?;
    Ok(Json(BlockResponse::from_block(block, 0)))
}

/// DELETE /users/{user_id}/blocks/{label}
pub async fn delete_block(
    State(state): State<Arc<AppState>>,
    Path((user_id, label)): Path<(String, String)>,
) -> ApiResult<Json<DeleteResponse>> {
    let sha = state
        .blocks
        .delete_block(&user_id, &label, "user")
        .await?
        .ok_or(MentorError::BlockNotFound { label })?;
    Ok(Json(DeleteResponse {
        deleted: true,
        commit_sha: sha,
    }))
}

/// GET /users/{user_id}/blocks/{label}/history
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path((user_id, label)): Path<(String, String)>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<VersionListResponse>> {
    let versions = state.blocks.get_history(&user_id, &label, query.limit).await?;
    Ok(Json(VersionListResponse {
        versions: versions.into_iter().map(Into::into).collect(),
    }))
}

/// GET /users/{user_id}/blocks/{label}/versions/{sha}
pub async fn get_block_at_version(
    State(state): State<Arc<AppState>>,
    Path((user_id, label, sha)): Path<(String, String, String)>,
) -> ApiResult<Json<BlockResponse>> {
    let block = state
        .blocks
        .get_block_at_version(&user_id, &label, &sha)
        .await?
        .ok_or(MentorError::VersionNotFound { label, sha })?;
    Ok(Json(BlockResponse::from_block(block, 0)))
}

/// POST /users/{user_id}/blocks/{label}/restore
pub async fn restore_block(
    State(state): State<Arc<AppState>>,
    Path((user_id, label)): Path<(String, String)>,
    Json(req): Json<RestoreRequest>,
) -> ApiResult<Json<BlockResponse>> {
    state
        .blocks
        .restore_block(&user_id, &label, &req.commit_sha)
        .await?;
    let block = state
        .blocks
        .get_block(&user_id, &label)
        .await?
        .ok_or_else(|| MentorError::Internal("failed to re-read restored block".to_string()))?;
    Ok(Json(BlockResponse::from_block(block, 0)))
}

/// GET /users/{user_id}/blocks/{label}/diffs — at most one entry, the
/// active proposal.
pub async fn get_pending_diffs(
    State(state): State<Arc<AppState>>,
    Path((user_id, label)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ProposalDiffResponse>>> {
    let Some((diff, record)) = state.blocks.get_proposal_diff(&user_id, &label).await? else {
        return Ok(Json(Vec::new()));
    };

    let (id, operation) = match &record {
        Some(record) => (record.id.clone(), operation_name(record.operation)),
        // Branch without an index record: fall back to a URL-safe branch id.
        None => (diff.branch_name.replace('/', "__"), "full_replace".to_string()),
    };

    Ok(Json(vec![ProposalDiffResponse {
        id,
        block: diff.block_label,
        field: None,
        operation,
        reasoning: diff.reasoning,
        confidence: diff.confidence,
        created_at: diff.created_at,
        agent_id: diff.agent_id,
        old_value: diff.current_body,
        new_value: diff.proposed_body,
    }]))
}

/// POST /users/{user_id}/blocks/{label}/propose — agent-facing full-body
/// proposal.
pub async fn propose_edit(
    State(state): State<Arc<AppState>>,
    Path((user_id, label)): Path<(String, String)>,
    Json(req): Json<ProposeEditRequest>,
) -> ApiResult<Json<ProposeEditResponse>> {
    if req.reasoning.trim().is_empty() {
        return Err(ApiError(MentorError::InvalidInput(
            "reasoning must not be empty".to_string(),
        )));
    }

    let diff = state
        .blocks
        .propose_edit(
            &user_id,
            &label,
            &req.body,
            &req.agent_id,
            &req.reasoning,
            req.confidence,
            DiffOperation::FullReplace,
            None,
        )
        .await?;

    info!(user_id = %user_id, block = %label, agent = %req.agent_id, "proposal received via API");
    Ok(Json(ProposeEditResponse {
        branch_name: mentor_store::proposal_branch_name(&user_id, &label),
        diff_id: diff.id,
        success: true,
    }))
}

/// POST /users/{user_id}/blocks/{label}/diffs/{diff_id}/approve
pub async fn approve_diff(
    State(state): State<Arc<AppState>>,
    Path((user_id, label, diff_id)): Path<(String, String, String)>,
) -> ApiResult<Json<ApproveResponse>> {
    let sha = state.blocks.approve_diff(&user_id, &label, &diff_id).await?;
    Ok(Json(ApproveResponse {
        approved: true,
        commit_sha: sha,
    }))
}

/// POST /users/{user_id}/blocks/{label}/diffs/{diff_id}/reject
pub async fn reject_diff(
    State(state): State<Arc<AppState>>,
    Path((user_id, label, diff_id)): Path<(String, String, String)>,
) -> ApiResult<Json<RejectResponse>> {
    state.blocks.reject_diff(&user_id, &label, &diff_id).await?;
    Ok(Json(RejectResponse { rejected: true }))
}

fn operation_name(op: DiffOperation) -> String {
    match op {
        DiffOperation::Append => "append",
        DiffOperation::Replace => "replace",
        DiffOperation::LlmDiff => "llm_diff",
        DiffOperation::FullReplace => "full_replace",
    }
    .to_string()
}
