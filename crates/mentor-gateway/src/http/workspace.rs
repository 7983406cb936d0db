//! Workspace file endpoints: index, download, upload, delete.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Response},
    Json,
};
use mentor_core::MentorError;
use mentor_workspace::WorkspaceIndex;
use serde::{Deserialize, Serialize};

use crate::app::AppState;
use crate::error::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct IndexQuery {
    #[serde(default)]
    pub refresh: bool,
}

#[derive(Serialize)]
pub struct FileMetadataResponse {
    pub path: String,
    pub hash: String,
    pub size: u64,
}

/// GET /users/{user_id}/workspace/files
pub async fn list_files(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(query): Query<IndexQuery>,
) -> ApiResult<Json<WorkspaceIndex>> {
    let workspace = state.workspaces.for_user(&user_id)?;
    let index = if query.refresh {
        workspace.refresh_index().await?
    } else {
        workspace.file_index()
    };
    Ok(Json(index))
}

/// GET /users/{user_id}/workspace/files/{path} — raw download with a
/// content type inferred from the extension.
pub async fn download_file(
    State(state): State<Arc<AppState>>,
    Path((user_id, path)): Path<(String, String)>,
) -> ApiResult<Response> {
    let workspace = state.workspaces.for_user(&user_id)?;
    let content = workspace.read_file(&path).await?;

    let filename = path.rsplit('/').next().unwrap_or(&path).to_string();
    let response = (
        [
            (header::CONTENT_TYPE, content_type_for(&path).to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        content,
    )
        .into_response();
    Ok(response)
}

/// PUT /users/{user_id}/workspace/files/{path} — raw body upload.
pub async fn upload_file(
    State(state): State<Arc<AppState>>,
    Path((user_id, path)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<FileMetadataResponse>> {
    if body.is_empty() {
        return Err(ApiError(MentorError::InvalidInput(
            "empty file content".to_string(),
        )));
    }

    let workspace = state.workspaces.for_user(&user_id)?;
    let metadata = workspace.write_file(&path, &body).await?;
    Ok(Json(FileMetadataResponse {
        path: metadata.path,
        hash: metadata.hash,
        size: metadata.size,
    }))
}

/// DELETE /users/{user_id}/workspace/files/{path}
pub async fn delete_file(
    State(state): State<Arc<AppState>>,
    Path((user_id, path)): Path<(String, String)>,
) -> ApiResult<Json<serde_json::Value>> {
    let workspace = state.workspaces.for_user(&user_id)?;
    if !workspace.delete_file(&path).await? {
        return Err(ApiError(MentorError::FileNotFound { path }));
    }
    Ok(Json(serde_json::json!({ "deleted": true })))
}

fn content_type_for(path: &str) -> &'static str {
    let suffix = path.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
    match suffix.as_str() {
        "txt" => "text/plain",
        "md" => "text/markdown",
        "json" => "application/json",
        "py" => "text/x-python",
        "js" => "text/javascript",
        "html" => "text/html",
        "css" => "text/css",
        "xml" => "application/xml",
        "yaml" | "yml" => "application/x-yaml",
        "pdf" => "application/pdf",
        _ => "application/octet-stream",
    }
}
