//! Application error type.
//!
//! Every failure that can reach an HTTP handler is an [`AppError`]. Its
//! [`IntoResponse`] impl decides what the caller sees: validation and
//! availability problems are reported as-is, everything else collapses to a
//! fixed message while the detail stays in the server log.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::config::ConfigError;
use crate::response::ApiResponse;

/// Message returned for every internal failure.
pub const GENERIC_ERROR_MESSAGE: &str =
    "We encountered an error processing your request. Please try another way to ask the question.";

/// Result alias used across the workspace.
pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    /// Request payload failed validation.
    #[error("{0}")]
    Validation(String),

    /// The service could not initialize and refuses all questions.
    #[error("Service Unavailable: {0}")]
    ServiceUnavailable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("database connection failed: {0}")]
    DatabaseConnection(String),

    #[error("database query failed: {0}")]
    DatabaseQuery(String),

    /// SQL rejected by the read-only guard.
    #[error("unsafe SQL: {0}")]
    UnsafeSql(String),

    /// The hosted language model failed or answered unusably.
    #[error("language model request failed: {0}")]
    LanguageModel(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::ServiceUnavailable(_) | AppError::Config(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            AppError::DatabaseConnection(_)
            | AppError::DatabaseQuery(_)
            | AppError::UnsafeSql(_)
            | AppError::LanguageModel(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::ServiceUnavailable(_) | AppError::Config(_) => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Message safe to show to the caller.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Validation(_) => self.to_string(),
            AppError::ServiceUnavailable(_) => self.to_string(),
            AppError::Config(e) => format!("Service Unavailable: {}", e),
            _ => GENERIC_ERROR_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ApiResponse::err(self.code(), self.public_message());
        (status, Json(body)).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(message) => message.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        AppError::Validation(messages.join("; "))
    }
}
