//! Error types for the HomeSystem pipeline server

use std::time::Duration;

use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::document::{DocumentId, PipelineState};
use crate::pipeline::PipelineError;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Document store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(DocumentId),

    /// The stored state no longer matches what the caller expected
    #[error("Document {id} is {actual}, expected {expected}")]
    Conflict {
        id: DocumentId,
        expected: PipelineState,
        actual: PipelineState,
    },

    #[error("Illegal transition {from} -> {to}")]
    InvalidTransition {
        from: PipelineState,
        to: PipelineState,
    },

    #[error("Document {id} already finished as {state}")]
    Terminal { id: DocumentId, state: PipelineState },

    /// Another worker holds an unexpired claim on the stage
    #[error("Document {id} is {state}, claimed for another {remaining:?}")]
    Claimed {
        id: DocumentId,
        state: PipelineState,
        remaining: Duration,
    },

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::Validation(msg) => AppError::Validation(msg),
            PipelineError::NotFound(id) => AppError::NotFound(format!("Document not found: {}", id)),
            PipelineError::Store(StoreError::Terminal { id, state }) => {
                AppError::Conflict(format!("Document {} already finished as {}", id, state))
            }
            PipelineError::Store(e) => AppError::Store(e),
            PipelineError::Queue(e) => AppError::Internal(e.to_string()),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "validation_error", msg.clone())
            }
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Store(e) => {
                tracing::error!("Store error: {}", e);
                match e {
                    StoreError::NotFound(id) => (
                        StatusCode::NOT_FOUND,
                        "not_found",
                        format!("Document not found: {}", id),
                    ),
                    _ => (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "store_error",
                        "Document store error".to_string(),
                    ),
                }
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        (status, body).into_response()
    }
}
