//! Defines routes for the chunked upload protocol.
//!
//! ## Structure
//! - **Health**
//!   - `GET    /healthz`, `GET /readyz`
//!
//! - **Upload sessions**
//!   - `POST   /uploads/init`: allocate a session
//!   - `PUT    /uploads/{session_id}/chunks/{index}?total_chunks=N`: upload one chunk
//!   - `GET    /uploads/{session_id}`: session status
//!   - `POST   /uploads/{session_id}/complete`: assemble the artifact
//!   - `DELETE /uploads/{session_id}`: abort (idempotent)
//!
//! - **Single-shot and retrieval**
//!   - `POST   /uploads`: multipart upload of a small file
//!   - `GET    /files/{name}`: download a stored artifact

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        upload_handlers::{
            abort_upload, complete_upload, get_file, init_upload, session_status, upload_chunk,
            upload_file,
        },
    },
    services::upload_service::{UploadLimits, UploadService},
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
};

/// Multipart framing on top of the file itself.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Build and return the router for the upload API.
///
/// The router carries shared state (`UploadService`) to all handlers; body
/// limits come from `limits`.
pub fn routes(limits: &UploadLimits) -> Router<UploadService> {
    let max_chunk = usize::try_from(limits.max_chunk_size).unwrap_or(usize::MAX);
    let max_upload = usize::try_from(limits.max_upload_size)
        .unwrap_or(usize::MAX)
        .saturating_add(MULTIPART_OVERHEAD);

    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Session routes
        .route("/uploads/init", post(init_upload))
        .route(
            "/uploads/{session_id}/chunks/{index}",
            put(upload_chunk).layer(DefaultBodyLimit::max(max_chunk.saturating_add(1))),
        )
        .route(
            "/uploads/{session_id}/complete",
            post(complete_upload),
        )
        .route(
            "/uploads/{session_id}",
            get(session_status).delete(abort_upload),
        )
        // Single-shot upload and artifact download
        .route(
            "/uploads",
            post(upload_file).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/files/{name}", get(get_file))
}
