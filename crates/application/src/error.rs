use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
    /// 暂时性存储故障在重试后仍未恢复
    #[error("message store unavailable")]
    StoreUnavailable,
    #[error("authentication failed")]
    Authentication,
    #[error("session is not active")]
    SessionNotActive,
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        if value.is_transient() {
            ApplicationError::StoreUnavailable
        } else {
            ApplicationError::Repository(value)
        }
    }
}

impl ApplicationError {
    /// 稳定的机器可读错误码，用于错误帧和 HTTP 响应体。
    pub fn code(&self) -> &'static str {
        match self {
            ApplicationError::Domain(err) => match err {
                DomainError::SelfRequest => "self_request",
                DomainError::DuplicateRequest => "duplicate_request",
                DomainError::AlreadyFriends => "already_friends",
                DomainError::RequestNotFound => "request_not_found",
                DomainError::UserNotFound => "user_not_found",
                DomainError::RoomNotFound => "room_not_found",
                DomainError::NotMember => "not_member",
                DomainError::EmptyBody => "empty_body",
                DomainError::Unauthorized { .. } => "unauthorized",
                DomainError::InvalidArgument { .. } => "invalid_argument",
            },
            ApplicationError::Repository(RepositoryError::NotFound) => "not_found",
            ApplicationError::Repository(RepositoryError::Conflict) => "conflict",
            ApplicationError::Repository(_) => "storage_error",
            ApplicationError::StoreUnavailable => "store_unavailable",
            ApplicationError::Authentication => "authentication_failed",
            ApplicationError::SessionNotActive => "session_not_active",
        }
    }
}
