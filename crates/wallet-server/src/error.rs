//! Error types for the wallet server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::models::IntentStatus;
use crate::provider::ProviderError;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    Provider(#[from] ProviderError),

    #[error("Illegal intent transition for {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: String,
        from: IntentStatus,
        to: IntentStatus,
    },

    #[error("Insufficient funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: String, required: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code reported to callers.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BadRequest(_) => "VALIDATION_ERROR",
            AppError::Provider(e) => e.code(),
            AppError::InvalidTransition { .. } => "INVALID_TRANSITION",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }

    /// Transient failures that a later capture attempt can clear. The intent
    /// stays non-terminal either way.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Provider(ProviderError::AmountMismatch { .. }) => false,
            AppError::Provider(_) | AppError::Database(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
            AppError::Provider(e) => {
                tracing::warn!(code, "Provider error: {}", e);
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::InvalidTransition { .. } => (StatusCode::CONFLICT, self.to_string()),
            AppError::InsufficientFunds { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, self.to_string())
            }
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}
