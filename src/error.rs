use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Source key must not be empty")]
    EmptySourceKey,

    #[error("Unknown source '{requested}' (registered: {})", registered.join(", "))]
    UnknownSource {
        requested: String,
        registered: Vec<String>,
    },

    #[error("Normalization error: {0}")]
    Normalize(String),

    #[error("Invalid category '{category}': {reason}")]
    InvalidCategory { category: String, reason: String },

    #[error("Source fetch error ({source_key}): {message}")]
    SourceFetch { source_key: String, message: String },

    #[error("Listing '{0}' not found")]
    ListingNotFound(String),

    #[error("A run is already in progress")]
    RunInProgress,

    #[error("Blob store error: {0}")]
    Blob(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::UnknownSource { .. } | AppError::ListingNotFound(_) => StatusCode::NOT_FOUND,
            AppError::Config(_) | AppError::InvalidCategory { .. } | AppError::EmptySourceKey => {
                StatusCode::BAD_REQUEST
            }
            AppError::RunInProgress => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
