use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::error::AppError;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug, Serialize, Clone)]
pub enum ApiError {
    #[error("Internal server error")]
    InternalError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::InvalidQuery(msg) | AppError::Validation(msg) => Self::ValidationError(msg),
            AppError::NotFound(msg) => Self::NotFound(msg),
            AppError::EncoderUnavailable(_) | AppError::IndexTimeout(_) => {
                tracing::warn!(error = %err, "Search backend unavailable");
                Self::ServiceUnavailable("Search backend unavailable".to_string())
            }
            _ => {
                tracing::error!("Internal error: {:?}", err);
                Self::InternalError("Internal server error".to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::InternalError(message) => (StatusCode::INTERNAL_SERVER_ERROR, message),
            Self::ValidationError(message) => (StatusCode::BAD_REQUEST, message),
            Self::NotFound(message) => (StatusCode::NOT_FOUND, message),
            Self::ServiceUnavailable(message) => (StatusCode::SERVICE_UNAVAILABLE, message),
        };

        let body = ErrorResponse {
            error: message,
            status: "error".to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Serialize, Debug)]
struct ErrorResponse {
    error: String,
    status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fmt::Debug;

    fn assert_status_code<T: IntoResponse + Debug>(response: T, expected_status: StatusCode) {
        let response = response.into_response();
        assert_eq!(response.status(), expected_status);
    }

    #[test]
    fn test_app_error_to_api_error_conversion() {
        let invalid = AppError::InvalidQuery("query must not be blank".to_string());
        assert!(matches!(
            ApiError::from(invalid),
            ApiError::ValidationError(msg) if msg == "query must not be blank"
        ));

        let validation = AppError::Validation("weights must sum to 1".to_string());
        assert!(matches!(ApiError::from(validation), ApiError::ValidationError(_)));

        let not_found = AppError::NotFound("image".to_string());
        assert!(matches!(ApiError::from(not_found), ApiError::NotFound(msg) if msg == "image"));

        let encoder = AppError::EncoderUnavailable("all terms failed".to_string());
        assert!(matches!(ApiError::from(encoder), ApiError::ServiceUnavailable(_)));

        let timeout = AppError::IndexTimeout("recall failed".to_string());
        assert!(matches!(ApiError::from(timeout), ApiError::ServiceUnavailable(_)));

        let io = AppError::Io(std::io::Error::other("disk gone"));
        assert!(matches!(ApiError::from(io), ApiError::InternalError(_)));
    }

    #[test]
    fn test_api_error_response_status_codes() {
        assert_status_code(
            ApiError::InternalError("boom".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        );
        assert_status_code(
            ApiError::ValidationError("bad".to_string()),
            StatusCode::BAD_REQUEST,
        );
        assert_status_code(ApiError::NotFound("gone".to_string()), StatusCode::NOT_FOUND);
        assert_status_code(
            ApiError::ServiceUnavailable("down".to_string()),
            StatusCode::SERVICE_UNAVAILABLE,
        );
    }

    #[test]
    fn test_internal_error_sanitization() {
        let api_error = ApiError::from(AppError::InternalError("index file corrupted".to_string()));

        assert_eq!(api_error.to_string(), "Internal server error");
        assert!(matches!(&api_error, ApiError::InternalError(msg) if msg == "Internal server error"));
        assert_status_code(api_error, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_unavailable_message_hides_backend_detail() {
        let api_error = ApiError::from(AppError::EncoderUnavailable("model path /secret".to_string()));
        assert_eq!(
            api_error.to_string(),
            "Service unavailable: Search backend unavailable"
        );
    }
}
