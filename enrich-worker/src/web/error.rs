//! API error mapping: `EnrichError` kinds to HTTP statuses and a uniform
//! JSON error body.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use enrich_shared::error::EnrichError;

/// Dispatcher-facing error wrapper
#[derive(Debug)]
pub struct ApiError(pub EnrichError);

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            EnrichError::Validation(_) => StatusCode::BAD_REQUEST,
            EnrichError::NotFound(_) => StatusCode::NOT_FOUND,
            EnrichError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EnrichError> for ApiError {
    fn from(e: EnrichError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "status": "error",
            "type": self.0.kind(),
            "message": self.0.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError(EnrichError::validation("x")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError(EnrichError::not_found("x")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError(EnrichError::Auth("x".into())).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError(EnrichError::Internal("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError(EnrichError::Queue("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
