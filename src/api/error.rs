use axum::{Json, http::StatusCode, response::IntoResponse};
use thiserror::Error;

use super::models::ErrorResponse;
use crate::ErrorKind;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Service(#[from] crate::Error),
    #[error("payload invalid: {0}")]
    InvalidPayload(String),
    /// Carries the limit that was exceeded
    #[error("payload exceeds the {0} byte limit")]
    PayloadTooLarge(usize),
    #[error("bad API key")]
    Unauthorized,
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Service(err) => match err.kind() {
                ErrorKind::Configuration | ErrorKind::Validation | ErrorKind::Unsupported => {
                    StatusCode::BAD_REQUEST
                }
                ErrorKind::Permission => StatusCode::FORBIDDEN,
                ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            },
            ApiError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Service(err) => match err.kind() {
                ErrorKind::Configuration => "CONFIGURATION_ERROR",
                ErrorKind::Permission => "PERMISSION_DENIED",
                ErrorKind::Validation => "VALIDATION_ERROR",
                ErrorKind::Conflict => "CONFLICT",
                ErrorKind::NotFound => "NOT_FOUND",
                ErrorKind::BackendUnavailable => "BACKEND_UNAVAILABLE",
                ErrorKind::Unsupported => "UNSUPPORTED_OPERATION",
            },
            ApiError::InvalidPayload(_) => "INVALID_PAYLOAD",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let body = ErrorResponse {
            status: "ERROR",
            code: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(value: serde_json::Error) -> Self {
        ApiError::InvalidPayload(value.to_string())
    }
}

impl From<crate::catalog::CatalogError> for ApiError {
    fn from(value: crate::catalog::CatalogError) -> Self {
        ApiError::Service(value.into())
    }
}

impl From<crate::identifier::IdentifierError> for ApiError {
    fn from(value: crate::identifier::IdentifierError) -> Self {
        ApiError::Service(value.into())
    }
}
