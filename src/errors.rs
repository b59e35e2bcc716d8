use crate::catalog::{CatalogError, bucket::NameRule, lock::LockTimeout};
use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::{fmt, io};
use thiserror::Error;

/// Typed outcome of every core operation. Rendering is left to [`AppError`].
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{name}` invalid: {rule}")]
    InvalidBucketName { name: String, rule: NameRule },
    #[error("object key `{key}` invalid: {reason}")]
    InvalidObjectKey { key: String, reason: &'static str },
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("bucket `{0}` already exists")]
    BucketAlreadyExists(String),
    #[error("bucket `{0}` is not empty")]
    BucketNotEmpty(String),
    #[error("object `{key}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, key: String },
    #[error("busy: {0}")]
    Busy(#[from] LockTimeout),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("storage task aborted: {0}")]
    Task(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    /// Failures a client may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StorageError::Busy(_)
                | StorageError::Catalog(_)
                | StorageError::Io(_)
                | StorageError::Task(_)
        )
    }
}

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status, code and message.
    pub fn new(status: StatusCode, code: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", msg)
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(code: &'static str, msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, msg)
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
            "code": self.code,
            "status": self.status.as_u16()
        }));

        let mut response = (self.status, body).into_response();
        if self.status == StatusCode::SERVICE_UNAVAILABLE {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
        }
        response
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        match err {
            StorageError::InvalidBucketName { .. } => {
                AppError::bad_request("InvalidBucketName", message)
            }
            StorageError::InvalidObjectKey { .. } => AppError::bad_request("InvalidKey", message),
            StorageError::BucketNotFound(_) => {
                AppError::new(StatusCode::NOT_FOUND, "NoSuchBucket", message)
            }
            StorageError::ObjectNotFound { .. } => {
                AppError::new(StatusCode::NOT_FOUND, "NoSuchKey", message)
            }
            StorageError::BucketAlreadyExists(_) => {
                AppError::new(StatusCode::CONFLICT, "BucketAlreadyExists", message)
            }
            StorageError::BucketNotEmpty(_) => {
                AppError::new(StatusCode::CONFLICT, "BucketNotEmpty", message)
            }
            StorageError::Busy(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "SlowDown", message)
            }
            StorageError::Catalog(_) | StorageError::Io(_) | StorageError::Task(_) => {
                tracing::error!("storage failure: {}", message);
                AppError::internal(message)
            }
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}
