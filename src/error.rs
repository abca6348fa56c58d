use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::api::bitrix24::Bitrix24Error;
use crate::api::telemost::TelemostError;
use crate::api::yandex_oauth::OAuthError;
use crate::repositories::conference_repository::RepositoryError;
use crate::repositories::credential_repository::CredentialError;
use crate::utils::conference_sync::SyncError;

/// Error type for handlers. Every variant renders as JSON `{error}`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Remote(TelemostError),
    #[error("{0}")]
    NotConfigured(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            AppError::Conflict(message) => (StatusCode::CONFLICT, json!({ "error": message })),
            AppError::Remote(e) => (StatusCode::BAD_REQUEST, e.to_json()),
            AppError::NotConfigured(message) => (StatusCode::SERVICE_UNAVAILABLE, json!({ "error": message })),
            AppError::Upstream(message) => (StatusCode::BAD_GATEWAY, json!({ "error": message })),
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (StatusCode::INTERNAL_SERVER_ERROR, json!({ "error": message }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<RepositoryError> for AppError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::ConstraintViolation(message) => {
                AppError::Conflict(format!("Conference conflicts with an existing one, retry: {}", message))
            }
            other => AppError::Internal(format!("Storage error: {}", other)),
        }
    }
}

impl From<CredentialError> for AppError {
    fn from(e: CredentialError) -> Self {
        AppError::Internal(format!("Credential store error: {}", e))
    }
}

impl From<SyncError> for AppError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::Remote(e) => AppError::Remote(e),
            SyncError::NotFound(_) => AppError::NotFound("Conference not found".to_string()),
            SyncError::Repository(e) => e.into(),
            SyncError::Credentials(e) => e.into(),
        }
    }
}

impl From<Bitrix24Error> for AppError {
    fn from(e: Bitrix24Error) -> Self {
        match e {
            Bitrix24Error::Credentials(e) => e.into(),
            other @ Bitrix24Error::NotConfigured => AppError::NotConfigured(other.to_string()),
            other @ Bitrix24Error::NotInstalled(_) => AppError::NotFound(other.to_string()),
            other => AppError::Upstream(other.to_string()),
        }
    }
}

impl From<OAuthError> for AppError {
    fn from(e: OAuthError) -> Self {
        AppError::Upstream(e.to_string())
    }
}

impl From<crate::handlers::request_params::ParamsError> for AppError {
    fn from(e: crate::handlers::request_params::ParamsError) -> Self {
        AppError::BadRequest(e.message)
    }
}
