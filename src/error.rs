//! Error types for the application

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Database error" }),
                )
            }
            AppError::Migration(e) => {
                tracing::error!("Migration error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Database error" }),
                )
            }
            AppError::Validation { field, message } => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Validation failed", "field": field, "message": message }),
            ),
            // Denials carry no internal detail
            AppError::Unauthorized(e) => {
                tracing::debug!("Unauthorized: {}", e);
                (
                    StatusCode::FORBIDDEN,
                    json!({ "error": "You are not allowed to perform this action" }),
                )
            }
            AppError::InvalidState(e) => {
                tracing::debug!("Invalid state: {}", e);
                (
                    StatusCode::CONFLICT,
                    json!({ "error": "The request is not in a state that allows this action" }),
                )
            }
            AppError::NotFound(e) => (StatusCode::NOT_FOUND, json!({ "error": e })),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal error" }),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
