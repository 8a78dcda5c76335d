use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use sqlx::Error as SqlxError;
use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum LecternError {
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] SqlxError),

    #[error("Ractor error: {0}")]
    RactorError(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Sign-in link is invalid or expired")]
    InvalidMagicLink,

    #[error("Admin rights required")]
    Forbidden,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Upstream error with status: {0}")]
    UpstreamStatus(StatusCode),

    #[error("Timed out waiting for {0}")]
    Timeout(String),
}

/// Whether a failed call is worth repeating under a backoff policy.
pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for LecternError {
    fn is_retryable(&self) -> bool {
        match self {
            LecternError::Reqwest(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            LecternError::UpstreamStatus(code) => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            LecternError::Timeout(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for LecternError {
    fn into_response(self) -> axum::response::Response {
        let (status, code, message) = match &self {
            LecternError::NotFound(what) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{what} not found."),
            ),
            LecternError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            LecternError::Unauthorized | LecternError::InvalidMagicLink => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
            ),
            LecternError::Forbidden => (StatusCode::FORBIDDEN, "FORBIDDEN", self.to_string()),
            LecternError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            LecternError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMIT",
                "Too many requests, try again later.".to_string(),
            ),
            LecternError::Reqwest(_)
            | LecternError::UrlParse(_)
            | LecternError::UpstreamStatus(_)
            | LecternError::Timeout(_) => (
                StatusCode::BAD_GATEWAY,
                "BAD_GATEWAY",
                "Upstream service is unavailable.".to_string(),
            ),
            LecternError::Json(_) => (
                StatusCode::BAD_REQUEST,
                "BAD_REQUEST",
                "Malformed JSON payload.".to_string(),
            ),
            LecternError::DatabaseError(SqlxError::RowNotFound) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                "Resource not found.".to_string(),
            ),
            LecternError::DatabaseError(_) | LecternError::Io(_) | LecternError::RactorError(_) => {
                tracing::error!(error = %self, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        let body = ApiErrorBody {
            code: code.to_string(),
            message,
        };
        (status, Json(ApiErrorResponse { error: body })).into_response()
    }
}

/// Standardized API error response body
#[derive(Serialize)]
pub struct ApiErrorBody {
    pub code: String,
    pub message: String,
}

#[derive(Serialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorBody,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_side_upstream_statuses_are_retryable() {
        assert!(LecternError::UpstreamStatus(StatusCode::BAD_GATEWAY).is_retryable());
        assert!(LecternError::UpstreamStatus(StatusCode::TOO_MANY_REQUESTS).is_retryable());
        assert!(!LecternError::UpstreamStatus(StatusCode::NOT_FOUND).is_retryable());
        assert!(!LecternError::Forbidden.is_retryable());
    }

    #[test]
    fn forbidden_maps_to_403() {
        let resp = LecternError::Forbidden.into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        let resp = LecternError::NotFound("chapter".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
