use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Malformed user input. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("CRN must be a 5-digit number, got `{0}`")]
    InvalidCrn(String),

    #[error("invalid term `{0}`; use a known label such as `Fall 2025` or a 6-digit term code")]
    InvalidTerm(String),
}

/// Failure to obtain a seat record from the availability source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("could not reach registration system: {0}")]
    Transport(String),

    #[error("registration system answered with status {0}")]
    Status(u16),

    #[error("unexpected page structure: {0}")]
    Structure(String),

    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
}

impl FetchError {
    /// Short stable label for log fields.
    pub fn as_label(&self) -> &'static str {
        match self {
            FetchError::Transport(_) => "fetch_transport",
            FetchError::Status(_) => "fetch_status",
            FetchError::Structure(_) => "fetch_structure",
            FetchError::Timeout(_) => "fetch_timeout",
        }
    }
}

/// The watchlist file could not be read or written.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("watchlist I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("watchlist file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config.json not found in any of: {searched}")]
    NotFound { searched: String },

    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config.json: {0}")]
    Parse(#[source] serde_json::Error),
}

/// Everything an HTTP handler can fail with.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("CRN {0} does not exist or has no available section")]
    UnknownCrn(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Fetch(FetchError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Fetch(_) => StatusCode::BAD_GATEWAY,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UnknownCrn(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), "request failed: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}
