use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::services::{card_import::ImportError, card_lifecycle::LifecycleError};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidState(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Database(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let message = match self {
            AppError::Validation(msg)
            | AppError::NotFound(msg)
            | AppError::InvalidState(msg)
            | AppError::Forbidden(msg) => msg,
            AppError::Unauthorized => "Unauthorized".to_string(),
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error while handling request");
                "Internal server error".to_string()
            }
            AppError::Internal(e) => {
                tracing::error!(error = ?e, "Unexpected error while handling request");
                "Internal server error".to_string()
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl From<LifecycleError> for AppError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(msg) => AppError::Validation(msg),
            LifecycleError::CardNotFound => AppError::NotFound("Card not found".to_string()),
            LifecycleError::PatientNotFound => AppError::NotFound("Patient not found".to_string()),
            LifecycleError::TemplateNotFound => {
                AppError::NotFound("Template not found".to_string())
            }
            LifecycleError::CardInactive
            | LifecycleError::AlreadyInactive
            | LifecycleError::NotAssigned
            | LifecycleError::CardsUnavailable(_)
            | LifecycleError::ReplacementBarcodesTaken(_) => {
                AppError::InvalidState(err.to_string())
            }
            LifecycleError::Encryption(e) => AppError::Internal(e.into()),
            LifecycleError::Randomness(e) => AppError::Internal(e.into()),
            LifecycleError::Render(e) => AppError::Internal(e.into()),
            LifecycleError::Registry(e) => AppError::Internal(e.into()),
            LifecycleError::Database(e) => AppError::Database(e),
        }
    }
}

impl From<ImportError> for AppError {
    fn from(err: ImportError) -> Self {
        match err {
            ImportError::Csv(_) | ImportError::Validation(_) => {
                AppError::Validation(err.to_string())
            }
            ImportError::BarcodesInUse(_) => AppError::InvalidState(err.to_string()),
            ImportError::Randomness(e) => AppError::Internal(e.into()),
            ImportError::Database(e) => AppError::Database(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_errors_map_to_http_statuses() {
        let cases = [
            (LifecycleError::CardNotFound, StatusCode::NOT_FOUND),
            (LifecycleError::PatientNotFound, StatusCode::NOT_FOUND),
            (LifecycleError::CardInactive, StatusCode::BAD_REQUEST),
            (LifecycleError::AlreadyInactive, StatusCode::BAD_REQUEST),
            (
                LifecycleError::CardsUnavailable("assignment"),
                StatusCode::BAD_REQUEST,
            ),
            (
                LifecycleError::ReplacementBarcodesTaken(vec!["REPL-A".to_string()]),
                StatusCode::BAD_REQUEST,
            ),
            (
                LifecycleError::Validation("missing".to_string()),
                StatusCode::BAD_REQUEST,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }

    #[test]
    fn database_errors_are_internal() {
        let err = AppError::from(LifecycleError::Database(sqlx::Error::RowNotFound));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn internal_errors_hide_details_from_the_body() {
        let response = AppError::Internal(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
    }
}
