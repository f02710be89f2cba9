//! HTTP handlers for the chunked upload protocol.
//! Chunk and file bodies are streamed straight to disk; everything else is
//! delegated to `UploadService`.

use crate::{
    errors::AppError,
    models::{
        protocol::{AbortAck, ChunkAck, ChunkQuery, InitUploadRequest, InitUploadResponse, SessionStatusResponse},
        upload::UploadResult,
    },
    services::{
        artifact_store::ArtifactError,
        upload_service::{SingleUpload, UploadService},
    },
};
use axum::{
    Json,
    body::Body,
    extract::{
        Multipart, Path, Query, State,
        multipart::MultipartRejection,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use std::io;
use tokio_util::io::ReaderStream;

/// `POST /uploads/init`: allocate a session.
pub async fn init_upload(
    State(service): State<UploadService>,
    payload: Result<Json<InitUploadRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<InitUploadResponse>), AppError> {
    let Json(req) = payload.map_err(|e| AppError::bad_request(e.body_text()))?;
    let resp = service.init_upload(req).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

/// `PUT /uploads/{session_id}/chunks/{index}?total_chunks=N`: store one chunk.
pub async fn upload_chunk(
    State(service): State<UploadService>,
    path: Result<Path<(String, u32)>, PathRejection>,
    query: Result<Query<ChunkQuery>, QueryRejection>,
    body: Body,
) -> Result<Json<ChunkAck>, AppError> {
    let Path((session_id, index)) = path.map_err(|e| AppError::bad_request(e.body_text()))?;
    let Query(q) = query.map_err(|e| AppError::bad_request(e.body_text()))?;

    let stream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(io::Error::other));

    let ack = service
        .receive_chunk(&session_id, index, q.total_chunks, stream)
        .await?;
    Ok(Json(ack))
}

/// `GET /uploads/{session_id}`: received and missing chunks.
pub async fn session_status(
    State(service): State<UploadService>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<SessionStatusResponse>, AppError> {
    let Path(session_id) = path.map_err(|e| AppError::bad_request(e.body_text()))?;
    Ok(Json(service.status(&session_id).await?))
}

/// `POST /uploads/{session_id}/complete`: assemble and persist.
pub async fn complete_upload(
    State(service): State<UploadService>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<UploadResult>, AppError> {
    let Path(session_id) = path.map_err(|e| AppError::bad_request(e.body_text()))?;
    Ok(Json(service.complete_upload(&session_id).await?))
}

/// `DELETE /uploads/{session_id}`: release a session. Always succeeds for
/// unknown ids.
pub async fn abort_upload(
    State(service): State<UploadService>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Json<AbortAck>, AppError> {
    let Path(session_id) = path.map_err(|e| AppError::bad_request(e.body_text()))?;
    Ok(Json(service.abort_upload(&session_id).await?))
}

/// `POST /uploads`: single-shot multipart upload.
///
/// Text fields `title` and `tags` (repeatable or comma separated) must come
/// before the `file` field; anything after it is ignored.
pub async fn upload_file(
    State(service): State<UploadService>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<(StatusCode, Json<UploadResult>), AppError> {
    let mut multipart = multipart.map_err(|e| AppError::bad_request(e.body_text()))?;
    let mut meta = SingleUpload::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(e.body_text()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "title" => {
                meta.title = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| AppError::bad_request(e.body_text()))?,
                );
            }
            "tags" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::bad_request(e.body_text()))?;
                meta.tags
                    .extend(text.split(',').map(|t| t.trim().to_string()));
            }
            "file" => {
                meta.file_name = field.file_name().unwrap_or_default().to_string();
                meta.content_type = field.content_type().map(str::to_string);
                let stream = field.map(|chunk| chunk.map_err(io::Error::other));
                let result = service.upload_single(meta, stream).await?;
                return Ok((StatusCode::CREATED, Json(result)));
            }
            _ => {}
        }
    }

    Err(AppError::bad_request("multipart field `file` is required"))
}

/// `GET /files/{name}`: stream a stored artifact.
pub async fn get_file(
    State(service): State<UploadService>,
    path: Result<Path<String>, PathRejection>,
) -> Result<Response, AppError> {
    let Path(name) = path.map_err(|e| AppError::bad_request(e.body_text()))?;
    let (file, len) = service.artifacts.open(&name).await.map_err(|err| match err {
        ArtifactError::NotFound(_) | ArtifactError::InvalidName(_) => {
            AppError::not_found(format!("file `{}` not found", name))
        }
        ArtifactError::Io(e) => AppError::internal(e.to_string()),
    })?;

    let mut response = Response::new(Body::from_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for(&name)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    *response.status_mut() = StatusCode::OK;
    Ok(response.into_response())
}

fn content_type_for(name: &str) -> &'static str {
    let ext = name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "ogv" => "video/ogg",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
