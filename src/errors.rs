use axum::{http::StatusCode, Json};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("invalid path: path is absolute or escapes the project root")]
    InvalidPath,
    #[error("not found")]
    NotFound,
    #[error("unauthorized project: {0}")]
    UnauthorizedProject(String),
    #[error("no docker image configured for project: {0}")]
    NoImageConfigured(String),
    #[error("{0}")]
    ExecutionError(String),
    #[error("command timed out after {0:?}")]
    ExecTimeout(Duration),
    #[error("unknown session")]
    UnknownSession,
    #[error("request too large")]
    RequestTooLarge,
    #[error("rate limited")]
    RateLimited,
    #[error("tool error: {0}")]
    ToolError(String),
    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    pub fn code(&self) -> &'static str {
        match self {
            AppError::InvalidPath => "InvalidPath",
            AppError::NotFound => "NotFound",
            AppError::UnauthorizedProject(_) => "UnauthorizedProject",
            AppError::NoImageConfigured(_) => "NoImageConfigured",
            AppError::ExecutionError(_) => "ExecutionError",
            AppError::ExecTimeout(_) => "ExecTimeout",
            AppError::UnknownSession => "UnknownSession",
            AppError::RequestTooLarge => "RequestTooLarge",
            AppError::RateLimited => "RateLimited",
            AppError::ToolError(_) => "ToolError",
            AppError::Internal(_) => "Internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::InvalidPath | AppError::UnauthorizedProject(_) => StatusCode::FORBIDDEN,
            AppError::NotFound | AppError::UnknownSession => StatusCode::NOT_FOUND,
            AppError::NoImageConfigured(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::ExecTimeout(_) => StatusCode::REQUEST_TIMEOUT,
            AppError::ToolError(_) => StatusCode::BAD_REQUEST,
            AppError::ExecutionError(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error is a batch-level precondition that aborts before any command runs.
    pub fn is_precondition(&self) -> bool {
        matches!(self, AppError::UnauthorizedProject(_) | AppError::NoImageConfigured(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;

pub fn into_response(err: AppError) -> (StatusCode, Json<ErrorBody>) {
    (err.status(), Json(ErrorBody { code: err.code(), message: err.to_string() }))
}
