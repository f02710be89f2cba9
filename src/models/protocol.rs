//! Request and response bodies of the upload protocol.
//!
//! Shared by the axum handlers and by the client uploader so both sides agree
//! on field names.

use serde::{Deserialize, Serialize};

/// `POST /uploads/init`
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct InitUploadRequest {
    pub filename: String,
    pub size: u64,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Chunk size the client would like to use.
    #[serde(default)]
    pub chunk_size: Option<u64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct InitUploadResponse {
    pub session_id: String,
    /// Chunk size the client must use.
    pub chunk_size: u64,
    /// Estimated chunk count for the declared size.
    pub total_chunks: u32,
    pub final_name: String,
}

/// Query string of `PUT /uploads/{session_id}/chunks/{index}`.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ChunkQuery {
    pub total_chunks: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChunkAck {
    pub accepted: bool,
    /// The index had already been recorded; nothing was written.
    pub duplicate: bool,
    pub received_chunks: u32,
    pub total_chunks: u32,
    pub progress: f64,
}

/// `GET /uploads/{session_id}`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct SessionStatusResponse {
    pub session_id: String,
    pub file_name: String,
    pub declared_size: u64,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub received: Vec<u32>,
    pub missing: Vec<u32>,
    pub progress: f64,
}

/// `DELETE /uploads/{session_id}`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AbortAck {
    pub session_id: String,
    pub aborted: bool,
}

/// JSON envelope of every error response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorBody {
    pub error: String,
    pub category: String,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_chunks: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
