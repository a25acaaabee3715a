//! JSON envelope shared by every endpoint and the guards

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::core::auth::{JwtError, TransportError};
use crate::core::db::UserRepositoryError;

/// `{"status": .., "message": .., "data": ..}`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub status: u16,
    pub message: String,
    pub data: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(status: StatusCode, message: impl Into<String>, data: Option<T>) -> Self {
        Self {
            status: status.as_u16(),
            message: message.into(),
            data,
        }
    }

    /// 200 with a payload
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self::new(StatusCode::OK, message, Some(data))
    }
}

impl ApiResponse<()> {
    /// Payload-less envelope
    pub fn message(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, message, None)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// HTTP-level error
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("you are unauthorized")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),

    #[error(transparent)]
    Repository(#[from] UserRepositoryError),

    #[error(transparent)]
    Jwt(#[from] JwtError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Repository(err) => match err {
                UserRepositoryError::NotFound => StatusCode::NOT_FOUND,
                UserRepositoryError::UsernameOrPasswordWrong => StatusCode::UNAUTHORIZED,
                UserRepositoryError::EmailAlreadyExists
                | UserRepositoryError::UsernameAlreadyExists
                | UserRepositoryError::PhoneNumberAlreadyExists => StatusCode::CONFLICT,
                UserRepositoryError::HashingError(_)
                | UserRepositoryError::Store(_)
                | UserRepositoryError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Jwt(err) => match err {
                JwtError::InvalidToken(_) | JwtError::WrongTokenKind { .. } => {
                    StatusCode::UNAUTHORIZED
                }
                JwtError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::Transport(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }
        ApiResponse::message(status, self.to_string()).into_response()
    }
}
