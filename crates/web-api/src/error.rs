use application::ApplicationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use domain::{DomainError, RepositoryError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthenticated", message)
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let status = match &error {
            ApplicationError::Domain(domain) => match domain {
                DomainError::SelfRequest
                | DomainError::EmptyBody
                | DomainError::InvalidArgument { .. } => StatusCode::BAD_REQUEST,
                DomainError::DuplicateRequest | DomainError::AlreadyFriends => StatusCode::CONFLICT,
                DomainError::RequestNotFound
                | DomainError::UserNotFound
                | DomainError::RoomNotFound => StatusCode::NOT_FOUND,
                DomainError::NotMember | DomainError::Unauthorized { .. } => StatusCode::FORBIDDEN,
            },
            ApplicationError::Repository(RepositoryError::NotFound) => StatusCode::NOT_FOUND,
            ApplicationError::Repository(RepositoryError::Conflict) => StatusCode::CONFLICT,
            ApplicationError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApplicationError::StoreUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ApplicationError::Authentication => StatusCode::UNAUTHORIZED,
            ApplicationError::SessionNotActive => StatusCode::CONFLICT,
        };

        if status.is_server_error() {
            tracing::error!(error = %error, "请求处理失败");
        }

        ApiError::new(status, error.code(), error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
