use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
///
/// Every variant renders as `{ "error": <stable kind>, "details": <text> }`;
/// database and internal failures withhold details from the caller and log
/// them server-side instead.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Access token required")]
    AuthRequired,

    #[error("Invalid or expired token")]
    InvalidToken(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Failed to generate summary: {0}")]
    Generation(String),

    #[error("Database error")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    fn response_parts(&self) -> (StatusCode, &'static str, Option<String>) {
        match self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", Some(msg.clone()))
            }
            AppError::AuthRequired => (
                StatusCode::UNAUTHORIZED,
                "auth_required",
                Some("Access token required".to_string()),
            ),
            AppError::InvalidToken(msg) => {
                (StatusCode::FORBIDDEN, "invalid_token", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::Generation(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "generation_error",
                Some(msg.clone()),
            ),
            AppError::Database(err) => {
                tracing::error!(?err, "database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(?err, "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = self.response_parts();

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_map_to_bad_request() {
        let err = AppError::Validation("Answers are required".to_string());
        let (status, kind, details) = err.response_parts();

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(kind, "validation_error");
        assert_eq!(details.as_deref(), Some("Answers are required"));
    }

    #[test]
    fn auth_errors_split_between_missing_and_invalid() {
        let (status, kind, _) = AppError::AuthRequired.response_parts();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(kind, "auth_required");

        let (status, kind, _) =
            AppError::InvalidToken("signature mismatch".to_string()).response_parts();
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(kind, "invalid_token");
    }

    #[test]
    fn opaque_errors_withhold_details() {
        let err = AppError::Database(sqlx::Error::PoolClosed);
        let (status, kind, details) = err.response_parts();

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(kind, "database_error");
        assert!(details.is_none());

        let err = AppError::Internal(anyhow::anyhow!("boom"));
        let (_, kind, details) = err.response_parts();
        assert_eq!(kind, "internal_error");
        assert!(details.is_none());
    }
}
