//! Represents chunked upload sessions and the chunks received for them.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::PathBuf};

/// A chunked upload session, created by `init` and consumed by `complete`.
///
/// The chunk ledger is insert-only: a chunk index, once recorded, is never
/// replaced. The number of received chunks is always the ledger's size.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UploadSession {
    /// Unguessable token handed to the client; the only lookup key.
    pub session_id: String,

    /// Filename exactly as the client sent it.
    pub original_name: String,

    /// Filename with path components and unsafe characters removed.
    pub sanitized_name: String,

    /// Name the assembled artifact is stored under (`{session_id}.{ext}`).
    pub final_name: String,

    /// Size announced by the client at init. Informational only.
    pub declared_size: u64,

    /// MIME type announced by the client.
    pub content_type: String,

    /// Free-text metadata carried through to the result.
    pub title: Option<String>,
    pub tags: Vec<String>,

    /// Negotiated chunk size used for the initial `total_chunks` estimate.
    pub chunk_size: u64,

    /// Number of chunks that make up the file.
    pub total_chunks: u32,

    /// Whether a chunk upload has fixed `total_chunks`. Until then it is only
    /// the estimate computed at init.
    pub total_confirmed: bool,

    /// Chunk index -> record. Keys are always in `[0, total_chunks)`.
    pub received_chunks: BTreeMap<u32, ChunkRecord>,

    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// One accepted chunk, owned by its session.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ChunkRecord {
    /// Size in bytes actually written.
    pub size: u64,

    /// Temporary file holding the chunk bytes.
    pub path: PathBuf,

    /// Timestamp when this chunk was accepted.
    pub received_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn received_count(&self) -> u32 {
        self.received_chunks.len() as u32
    }

    pub fn received_bytes(&self) -> u64 {
        self.received_chunks.values().map(|c| c.size).sum()
    }

    pub fn has_chunk(&self, index: u32) -> bool {
        self.received_chunks.contains_key(&index)
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// Indices in `[0, total_chunks)` with no recorded chunk, ascending.
    pub fn missing_indices(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains_key(i))
            .collect()
    }

    /// Fraction of chunks received, in `[0.0, 1.0]`.
    pub fn progress(&self) -> f64 {
        if self.total_chunks == 0 {
            return 0.0;
        }
        f64::from(self.received_count()) / f64::from(self.total_chunks)
    }

    /// True once the session has seen no activity for longer than `ttl`.
    pub fn is_idle(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.last_activity_at < now - ttl
    }
}

/// Number of chunks needed to carry `size` bytes in pieces of `chunk_size`.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    size.div_ceil(chunk_size)
}
