use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("{service} returned status {status}: {body}")]
    Upstream {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the failed operation could plausibly succeed.
    ///
    /// Network timeouts, refused connections, 5xx and 429 responses and
    /// store IO failures are transient. Validation errors, 4xx responses,
    /// conflicts and malformed payloads are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_)
            ),
            AppError::Cache(e) => {
                e.is_timeout() || e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal()
            }
            AppError::HttpClient(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(false)
            }
            AppError::Upstream { status, .. } => *status >= 500 || *status == 429,
            AppError::NotFound(_)
            | AppError::InvalidInput(_)
            | AppError::ExternalApi(_)
            | AppError::Conflict(_)
            | AppError::Internal(_) => false,
        }
    }

    /// Builds an error from a non-success upstream response, mapping 409 to a conflict.
    pub async fn from_response(service: &'static str, response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::CONFLICT {
            return AppError::Conflict(format!("{} rejected the write: {}", service, body));
        }
        AppError::Upstream {
            service,
            status: status.as_u16(),
            body,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            AppError::ExternalApi(msg) => (StatusCode::BAD_GATEWAY, msg),
            AppError::HttpClient(_) | AppError::Upstream { .. } => {
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
