use crate::{models::protocol::ErrorBody, services::upload_service::UploadError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::{error, warn};

/// Whether error responses carry raw internal error text. Set once at
/// startup; only ever true in development.
static EXPOSE_DETAILS: AtomicBool = AtomicBool::new(false);

pub fn set_expose_details(expose: bool) {
    EXPOSE_DETAILS.store(expose, Ordering::Relaxed);
}

/// HTTP error envelope: a status, a machine-stable category and a message.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub category: &'static str,
    pub message: String,
    pub missing_chunks: Option<Vec<u32>>,
    /// Internal error text, only rendered in development.
    pub detail: Option<String>,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, category: &'static str, msg: impl Into<String>) -> Self {
        Self {
            status,
            category,
            message: msg.into(),
            missing_chunks: None,
            detail: None,
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(detail: impl Into<String>) -> Self {
        let mut err = Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal",
            "internal server error",
        );
        err.detail = Some(detail.into());
        err
    }

    /// Shortcut for 400 Bad Request
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", msg)
    }

    fn body(&self, expose_details: bool) -> ErrorBody {
        ErrorBody {
            error: self.message.clone(),
            category: self.category.to_string(),
            status: self.status.as_u16(),
            missing_chunks: self.missing_chunks.clone(),
            detail: if expose_details {
                self.detail.clone()
            } else {
                None
            },
        }
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
        if self.status.is_server_error() {
            error!(
                "{} ({}): {}",
                self.message,
                self.category,
                self.detail.as_deref().unwrap_or("-")
            );
        } else {
            warn!("{} ({})", self.message, self.category);
        }

        let body = Json(self.body(EXPOSE_DETAILS.load(Ordering::Relaxed)));
        (self.status, body).into_response()
    }
}

impl From<UploadError> for AppError {
    fn from(err: UploadError) -> Self {
        let category = err.category();
        match err {
            UploadError::Validation(_) | UploadError::BodyInterrupted(_) => {
                AppError::new(StatusCode::BAD_REQUEST, category, err.to_string())
            }
            UploadError::TooLarge { .. } => {
                AppError::new(StatusCode::PAYLOAD_TOO_LARGE, category, err.to_string())
            }
            UploadError::NotFound(_) => AppError::new(
                StatusCode::NOT_FOUND,
                category,
                "upload session not found or expired",
            ),
            UploadError::ChunkOutOfRange { .. } => {
                AppError::new(StatusCode::RANGE_NOT_SATISFIABLE, category, err.to_string())
            }
            UploadError::TotalMismatch { .. } => {
                AppError::new(StatusCode::CONFLICT, category, err.to_string())
            }
            UploadError::Incomplete { ref missing } => {
                let mut app = AppError::new(StatusCode::CONFLICT, category, err.to_string());
                app.missing_chunks = Some(missing.clone());
                app
            }
            UploadError::MissingData(_) => {
                let mut app = AppError::new(
                    StatusCode::UNPROCESSABLE_ENTITY,
                    category,
                    "uploaded chunk data is missing; re-send the chunks or restart",
                );
                app.detail = Some(err.to_string());
                app
            }
            UploadError::Artifact(ref inner) if category == "not_found" => {
                AppError::not_found(inner.to_string())
            }
            UploadError::Artifact(ref inner) if category == "validation" => {
                AppError::bad_request(inner.to_string())
            }
            UploadError::Io(_) | UploadError::Artifact(_) => {
                let mut app =
                    AppError::new(StatusCode::INSUFFICIENT_STORAGE, category, "storage failure");
                app.detail = Some(err.to_string());
                app
            }
            UploadError::Store(_) | UploadError::Internal(_) => AppError::internal(err.to_string()),
        }
    }
}
