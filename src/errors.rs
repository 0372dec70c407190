use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

use crate::services::{
    deletion_coordinator::CleanupError, file_tracker::TrackingError, job_store::JobStoreError,
};

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    /// Shortcut for 503 Service Unavailable
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::SERVICE_UNAVAILABLE, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

impl From<CleanupError> for AppError {
    fn from(err: CleanupError) -> Self {
        match err {
            CleanupError::InvalidProjectIdentifier(_) => AppError::bad_request(err.to_string()),
            CleanupError::ObjectStoreUnavailable(_) => AppError::unavailable(err.to_string()),
            CleanupError::TrackingPersistence(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<TrackingError> for AppError {
    fn from(err: TrackingError) -> Self {
        match err {
            TrackingError::EmptyKey => AppError::bad_request(err.to_string()),
            TrackingError::Persistence(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<JobStoreError> for AppError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(_) => AppError::not_found(err.to_string()),
            _ => AppError::internal(err.to_string()),
        }
    }
}
