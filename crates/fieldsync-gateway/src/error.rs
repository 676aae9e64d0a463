//! Error handling for the gateway.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fieldsync_store::StoreError;
use serde_json::json;
use thiserror::Error;

/// Errors surfaced to HTTP clients.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing, malformed or incorrect bearer credential. Deliberately
    /// carries no detail.
    #[error("unauthorized")]
    Unauthorized,

    /// Allowlist mode and the project is not on the list.
    #[error("project is not in the allowlist")]
    ProjectNotInAllowlist,

    /// Capacity mode and the server is full.
    #[error("server is already syncing the maximum number of projects ({max})")]
    TooManyProjects { max: usize },

    /// Request failed validation.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Unknown project public id.
    #[error("project not found")]
    ProjectNotFound,

    /// Store failure.
    #[error("store error: {0}")]
    Store(StoreError),

    /// Anything else.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthorized => "UNAUTHORIZED",
            GatewayError::ProjectNotInAllowlist => "PROJECT_NOT_IN_ALLOWLIST",
            GatewayError::TooManyProjects { .. } => "TOO_MANY_PROJECTS",
            GatewayError::InvalidRequest(_) => "INVALID_REQUEST",
            GatewayError::ProjectNotFound => "PROJECT_NOT_FOUND",
            GatewayError::Store(_) => "STORE_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::Unauthorized => StatusCode::UNAUTHORIZED,
            GatewayError::ProjectNotInAllowlist | GatewayError::TooManyProjects { .. } => {
                StatusCode::FORBIDDEN
            }
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::ProjectNotFound => StatusCode::NOT_FOUND,
            GatewayError::Store(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => GatewayError::ProjectNotFound,
            other => GatewayError::Store(other),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
