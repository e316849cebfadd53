// [apps/orchestrator/src/errors.rs]
//! Stable API error codes and their HTTP/response-envelope mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("vm not found: {0}")]
    VmNotFound(String),
    #[error("node not found: {0}")]
    NodeNotFound(String),
    #[error("vm is not running: {0}")]
    VmNotRunning(String),
    #[error(transparent)]
    InvalidTransition(#[from] orchestrator_domain::InvalidTransition),
    #[error("no node has capacity for this request")]
    NoCapacity,
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("forbidden")]
    Forbidden,
    #[error("unauthenticated")]
    Unauthenticated,
}

impl ApiError {
    fn code(&self) -> &'static str {
        match self {
            Self::VmNotFound(_) => "VM_NOT_FOUND",
            Self::NodeNotFound(_) => "NODE_NOT_FOUND",
            Self::VmNotRunning(_) => "VM_NOT_RUNNING",
            Self::InvalidTransition(_) => "INVALID_TRANSITION",
            Self::NoCapacity => "NO_CAPACITY",
            Self::Timeout(_) => "TIMEOUT",
            Self::Forbidden => "FORBIDDEN",
            Self::Unauthenticated => "UNAUTHENTICATED",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::VmNotFound(_) | Self::NodeNotFound(_) => StatusCode::NOT_FOUND,
            Self::VmNotRunning(_) | Self::NoCapacity | Self::Timeout(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition(_) => StatusCode::CONFLICT,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
        }
    }
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    success: bool,
    error_code: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope { success: false, error_code: self.code(), message: self.to_string() };
        (self.status(), Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// The success counterpart of `ErrorEnvelope` — every handler returns either
/// this or an `ApiError`, so every response on the wire is `{success, data?,
/// error_code?, message?}` regardless of outcome.
#[derive(Serialize)]
struct SuccessEnvelope<T: Serialize> {
    success: bool,
    data: T,
}

pub struct ApiResponse<T: Serialize>(pub StatusCode, pub T);

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self(StatusCode::OK, data)
    }

    pub fn created(data: T) -> Self {
        Self(StatusCode::CREATED, data)
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (self.0, Json(SuccessEnvelope { success: true, data: self.1 })).into_response()
    }
}
