use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;
use tracing::error;

use murmur_db::StoreError;
use murmur_types::api::{ErrorBody, ErrorDetail};

/// Outward error taxonomy for request-style calls. Store faults are mapped
/// into this and never reach the client verbatim.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or malformed input; the caller can fix it.
    #[error("{0}")]
    Validation(String),

    /// Bad, expired or inactive key, wrong password, or someone else's data.
    /// Deliberately does not say which.
    #[error("invalid credentials")]
    Auth,

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    /// Detail is logged, not returned.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(msg) => Self::Conflict(msg),
            StoreError::NotFound(msg) => Self::NotFound(msg),
            StoreError::Invalid(msg) => Self::Validation(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = %detail, "Internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.to_string(),
            },
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_map_onto_taxonomy() {
        let conflict: ApiError = StoreError::Conflict("taken".into()).into();
        assert_eq!(conflict.code(), "CONFLICT");

        let missing: ApiError = StoreError::NotFound("user 4".into()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let invalid: ApiError = StoreError::Invalid("empty".into()).into();
        assert_eq!(invalid.code(), "VALIDATION_ERROR");

        let fault: ApiError = StoreError::Internal("disk on fire".into()).into();
        assert_eq!(fault.code(), "INTERNAL_ERROR");
        assert_eq!(fault.to_string(), "internal error");
    }
}
