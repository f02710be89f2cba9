//! Represents a finished upload: the stored artifact handed back to the client.

use serde::{Deserialize, Serialize};

/// Reference to an assembled, persisted artifact.
///
/// The struct describes where the bytes live; it does not hold them.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadResult {
    /// Stable identifier (the session id for chunked uploads).
    pub id: String,

    /// Name the artifact is stored under.
    pub file_name: String,

    /// Dereferenceable location (URL or path) of the artifact.
    pub location: String,

    /// Size in bytes of the stored artifact.
    pub size: u64,

    /// Content type declared by the client.
    pub content_type: String,

    /// MD5 of the stored bytes, hex encoded.
    pub etag: String,

    /// Set when the format is not directly playable and has to be transcoded
    /// downstream before use.
    pub needs_conversion: bool,

    pub title: Option<String>,
    pub tags: Vec<String>,
}
