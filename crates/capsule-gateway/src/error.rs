//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use capsule_core::error::CapsuleError;

/// An HTTP error rendered as `{"detail": "..."}`.
#[derive(Debug, Clone)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }
}

impl From<CapsuleError> for ApiError {
    fn from(err: CapsuleError) -> Self {
        match err {
            CapsuleError::Validation(msg) => Self::bad_request(msg),
            CapsuleError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, "Not found"),
            CapsuleError::Forbidden(_) => Self::new(StatusCode::FORBIDDEN, "Access denied"),
            other => {
                tracing::error!("❌ Request failed: {other}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (CapsuleError::Validation("bad".into()), StatusCode::BAD_REQUEST),
            (CapsuleError::NotFound(3), StatusCode::NOT_FOUND),
            (CapsuleError::Forbidden("x".into()), StatusCode::FORBIDDEN),
            (
                CapsuleError::StoreUnavailable("locked".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_validation_detail_passes_through() {
        let err = ApiError::from(CapsuleError::Validation("recipient is required".into()));
        assert_eq!(err.detail, "recipient is required");
    }
}
