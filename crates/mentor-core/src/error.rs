use thiserror::Error;

/// Service-wide error taxonomy. Every variant maps to a stable short code
/// (and, at the gateway, an HTTP status) so clients can branch on failures
/// without parsing prose.
#[derive(Debug, Error)]
pub enum MentorError {
    #[error("user not found: {id}")]
    UserNotFound { id: String },

    #[error("block not found: {label}")]
    BlockNotFound { label: String },

    #[error("version {sha} not found for block {label}")]
    VersionNotFound { label: String, sha: String },

    #[error("diff not found: {id}")]
    DiffNotFound { id: String },

    #[error("task '{name}' not found")]
    TaskNotFound { name: String },

    #[error("run not found: {id}")]
    RunNotFound { id: String },

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("file not found: {path}")]
    FileNotFound { path: String },

    #[error("file too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("edit is not unique: {0}")]
    DuplicateEdit(String),

    #[error("proposal conflicts with current main: {0}")]
    ProposalConflict(String),

    #[error("proposal is not pending (status: {status})")]
    ProposalStale { status: String },

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MentorError {
    /// Short discriminant string surfaced in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MentorError::UserNotFound { .. } => "USER_NOT_FOUND",
            MentorError::BlockNotFound { .. } => "BLOCK_NOT_FOUND",
            MentorError::VersionNotFound { .. } => "VERSION_NOT_FOUND",
            MentorError::DiffNotFound { .. } => "DIFF_NOT_FOUND",
            MentorError::TaskNotFound { .. } => "TASK_NOT_FOUND",
            MentorError::RunNotFound { .. } => "RUN_NOT_FOUND",
            MentorError::InvalidPath(_) => "INVALID_PATH",
            MentorError::FileNotFound { .. } => "FILE_NOT_FOUND",
            MentorError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            MentorError::InvalidInput(_) => "INVALID_INPUT",
            MentorError::DuplicateEdit(_) => "DUPLICATE_EDIT",
            MentorError::ProposalConflict(_) => "PROPOSAL_CONFLICT",
            MentorError::ProposalStale { .. } => "PROPOSAL_STALE",
            MentorError::ProviderUnavailable(_) => "PROVIDER_UNAVAILABLE",
            MentorError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, MentorError>;
