//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use mentor_core::MentorError;
use serde::Serialize;
use tracing::warn;

/// Wrapper that turns a [`MentorError`] into an HTTP response with a stable
/// discriminant code and human-readable detail.
pub struct ApiError(pub MentorError);

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            MentorError::UserNotFound { .. }
            | MentorError::BlockNotFound { .. }
            | MentorError::VersionNotFound { .. }
            | MentorError::DiffNotFound { .. }
            | MentorError::TaskNotFound { .. }
            | MentorError::RunNotFound { .. }
            | MentorError::FileNotFound { .. } => StatusCode::NOT_FOUND,
            MentorError::InvalidPath(_)
            | MentorError::FileTooLarge { .. }
            | MentorError::InvalidInput(_)
            | MentorError::DuplicateEdit(_) => StatusCode::BAD_REQUEST,
            MentorError::ProposalConflict(_) | MentorError::ProposalStale { .. } => {
                StatusCode::CONFLICT
            }
            MentorError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            MentorError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            warn!(code = self.0.code(), error = %self.0, "request failed");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.0.code(),
                message: self.0.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<MentorError> for ApiError {
    fn from(err: MentorError) -> Self {
        Self(err)
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
