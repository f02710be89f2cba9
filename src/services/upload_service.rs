//! src/services/upload_service.rs
//!
//! UploadService: the server half of the chunked upload protocol.
//!
//! Session state lives in an injected [`SessionStore`]; chunk bytes live as
//! individual files under `temp_dir` named `{session_id}.{index:06}.{nonce}.chunk`;
//! assembled artifacts are handed to an injected [`ArtifactStore`]. Nothing in
//! this file keeps per-session state in process memory, so any instance
//! sharing the same stores and `temp_dir` can serve any request.

use crate::{
    models::{
        protocol::{AbortAck, ChunkAck, InitUploadRequest, InitUploadResponse, SessionStatusResponse},
        session::{ChunkRecord, UploadSession, chunk_count},
        upload::UploadResult,
    },
    services::{
        artifact_store::{ArtifactError, ArtifactStore},
        filename::{final_name, sanitize_filename},
        session_store::{SessionStore, StoreError, Versioned},
    },
};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use bytes::Bytes;
use chrono::{DateTime, Duration, Utc};
use futures::{Stream, StreamExt, pin_mut};
use md5::Context;
use rand::RngCore;
use std::{
    collections::BTreeMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const SESSION_ID_BYTES: usize = 32;
/// Length of a base64url (unpadded) encoded session id.
const SESSION_ID_LEN: usize = 43;
const MAX_CAS_ATTEMPTS: usize = 32;
const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content types a browser can play without transcoding.
pub const PLAYABLE_CONTENT_TYPES: [&str; 3] = ["video/mp4", "video/webm", "video/ogg"];
/// Extensions trusted when the declared content type is generic.
pub const PLAYABLE_EXTENSIONS: [&str; 4] = ["mp4", "m4v", "webm", "ogv"];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{0}")]
    Validation(String),
    #[error("upload of {size} bytes exceeds the limit of {limit} bytes")]
    TooLarge { size: u64, limit: u64 },
    #[error("upload session `{0}` not found")]
    NotFound(String),
    #[error("chunk index {index} is outside [0, {total})")]
    ChunkOutOfRange { index: u32, total: u32 },
    #[error("declared total of {declared} chunks disagrees with the session total of {expected}")]
    TotalMismatch { declared: u32, expected: u32 },
    #[error("upload is incomplete: {} chunk(s) missing", .missing.len())]
    Incomplete { missing: Vec<u32> },
    #[error("chunk data missing: {0}")]
    MissingData(String),
    #[error("request body interrupted: {0}")]
    BodyInterrupted(io::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl UploadError {
    /// Machine-stable category reported to clients.
    pub fn category(&self) -> &'static str {
        match self {
            UploadError::Validation(_) | UploadError::BodyInterrupted(_) => "validation",
            UploadError::TooLarge { .. } => "too_large",
            UploadError::NotFound(_) => "not_found",
            UploadError::ChunkOutOfRange { .. } => "range",
            UploadError::TotalMismatch { .. } => "conflict",
            UploadError::Incomplete { .. } => "incomplete",
            UploadError::MissingData(_) => "missing_data",
            UploadError::Io(_) => "storage",
            UploadError::Artifact(ArtifactError::NotFound(_)) => "not_found",
            UploadError::Artifact(ArtifactError::InvalidName(_)) => "validation",
            UploadError::Artifact(ArtifactError::Io(_)) => "storage",
            UploadError::Store(_) | UploadError::Internal(_) => "internal",
        }
    }
}

pub type ServiceResult<T> = Result<T, UploadError>;

/// Policy values for the upload protocol.
#[derive(Clone, Debug)]
pub struct UploadLimits {
    /// Chunk size used when the client does not propose a valid one.
    pub chunk_size: u64,
    pub min_chunk_size: u64,
    /// Also the largest chunk body accepted.
    pub max_chunk_size: u64,
    pub max_upload_size: u64,
    pub max_chunks: u32,
    /// Sessions idle longer than this are reclaimed by the sweeper.
    pub idle_timeout: Duration,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            chunk_size: 5 * 1024 * 1024,
            min_chunk_size: 1024 * 1024,
            max_chunk_size: 50 * 1024 * 1024,
            max_upload_size: 4 * 1024 * 1024 * 1024,
            max_chunks: 10_000,
            idle_timeout: Duration::hours(1),
        }
    }
}

/// Outcome of one idle sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub sessions_removed: usize,
    pub chunk_files_removed: usize,
    pub orphans_removed: usize,
}

/// Metadata of a single-shot upload.
#[derive(Debug, Clone, Default)]
pub struct SingleUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Clone)]
pub struct UploadService {
    /// Session ledger shared by every request.
    pub sessions: Arc<dyn SessionStore>,

    /// Backend receiving assembled artifacts.
    pub artifacts: Arc<dyn ArtifactStore>,

    /// Directory holding chunk files and staged assemblies.
    pub temp_dir: PathBuf,

    pub limits: UploadLimits,
}

impl UploadService {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        artifacts: Arc<dyn ArtifactStore>,
        temp_dir: impl Into<PathBuf>,
        limits: UploadLimits,
    ) -> Self {
        Self {
            sessions,
            artifacts,
            temp_dir: temp_dir.into(),
            limits,
        }
    }

    /// Validate upload intent and allocate a session.
    pub async fn init_upload(&self, req: InitUploadRequest) -> ServiceResult<InitUploadResponse> {
        let sanitized = sanitize_filename(&req.filename)
            .ok_or_else(|| UploadError::Validation("filename is required".into()))?;
        if req.size == 0 {
            return Err(UploadError::Validation("size must be greater than zero".into()));
        }
        if req.size > self.limits.max_upload_size {
            return Err(UploadError::TooLarge {
                size: req.size,
                limit: self.limits.max_upload_size,
            });
        }

        let chunk_size = self.negotiate_chunk_size(req.size, req.chunk_size)?;
        let total_chunks = chunk_count(req.size, chunk_size) as u32;

        let session_id = new_session_id();
        let now = Utc::now();
        let session = UploadSession {
            final_name: final_name(&session_id, &sanitized),
            session_id: session_id.clone(),
            original_name: req.filename,
            sanitized_name: sanitized,
            declared_size: req.size,
            content_type: normalize_content_type(req.content_type.as_deref()),
            title: req.title.filter(|t| !t.trim().is_empty()),
            tags: clean_tags(req.tags),
            chunk_size,
            total_chunks,
            total_confirmed: false,
            received_chunks: BTreeMap::new(),
            created_at: now,
            last_activity_at: now,
        };
        self.sessions.insert(&session).await?;

        info!(
            "Initialized upload session {} for `{}` ({} bytes, {} chunks of {})",
            short_id(&session_id),
            session.sanitized_name,
            session.declared_size,
            total_chunks,
            chunk_size
        );

        Ok(InitUploadResponse {
            session_id,
            chunk_size,
            total_chunks,
            final_name: session.final_name,
        })
    }

    /// Client proposal if within bounds, otherwise the default, raised if
    /// needed so the file fits in `max_chunks` chunks.
    fn negotiate_chunk_size(&self, size: u64, proposed: Option<u64>) -> ServiceResult<u64> {
        let limits = &self.limits;
        let mut chunk_size = proposed
            .filter(|c| (limits.min_chunk_size..=limits.max_chunk_size).contains(c))
            .unwrap_or(limits.chunk_size);

        let floor = size.div_ceil(u64::from(limits.max_chunks));
        if chunk_size < floor {
            if floor > limits.max_chunk_size {
                return Err(UploadError::TooLarge {
                    size,
                    limit: limits.max_chunk_size * u64::from(limits.max_chunks),
                });
            }
            chunk_size = floor;
        }
        Ok(chunk_size)
    }

    /// Idempotently accept one chunk into an existing session.
    ///
    /// The body is fully persisted before the ledger records it. Re-sending
    /// an index that is already recorded is a successful no-op.
    pub async fn receive_chunk<S>(
        &self,
        session_id: &str,
        index: u32,
        declared_total: u32,
        body: S,
    ) -> ServiceResult<ChunkAck>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        if declared_total == 0 || declared_total > self.limits.max_chunks {
            return Err(UploadError::Validation(format!(
                "total_chunks must be between 1 and {}",
                self.limits.max_chunks
            )));
        }

        let current = self.load(session_id).await?.value;
        let total = effective_total(&current, declared_total)?;
        if index >= total {
            return Err(UploadError::ChunkOutOfRange { index, total });
        }
        if current.has_chunk(index) {
            debug!(
                "chunk {} of {} already recorded, ignoring resend",
                index,
                short_id(session_id)
            );
            return Ok(chunk_ack(&current, true));
        }

        let remaining = self
            .limits
            .max_upload_size
            .saturating_sub(current.received_bytes());
        let limit = remaining.min(self.limits.max_chunk_size);

        let path = self.chunk_path(session_id, index);
        let (size, _) = write_stream(&path, body, limit).await?;

        let record = ChunkRecord {
            size,
            path: path.clone(),
            received_at: Utc::now(),
        };

        match self.record_chunk(session_id, index, declared_total, record).await {
            Ok(ack) => {
                if ack.duplicate {
                    remove_quietly(&path).await;
                }
                Ok(ack)
            }
            Err(err) => {
                remove_quietly(&path).await;
                Err(err)
            }
        }
    }

    /// Insert a persisted chunk into the ledger with compare-and-swap.
    async fn record_chunk(
        &self,
        session_id: &str,
        index: u32,
        declared_total: u32,
        record: ChunkRecord,
    ) -> ServiceResult<ChunkAck> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Versioned { version, value } = self.load(session_id).await?;
            let mut session = value;

            reconcile_total(&mut session, declared_total)?;
            if index >= session.total_chunks {
                return Err(UploadError::ChunkOutOfRange {
                    index,
                    total: session.total_chunks,
                });
            }
            if session.has_chunk(index) {
                return Ok(chunk_ack(&session, true));
            }

            let size = record.size;
            session.last_activity_at = record.received_at;
            session.received_chunks.insert(index, record.clone());

            if self.sessions.compare_and_swap(version, &session).await? {
                debug!(
                    "recorded chunk {} ({} bytes) for {}: {}/{}",
                    index,
                    size,
                    short_id(session_id),
                    session.received_count(),
                    session.total_chunks
                );
                return Ok(chunk_ack(&session, false));
            }
            debug!(
                "session {} changed while recording chunk {}, retrying",
                short_id(session_id),
                index
            );
        }

        Err(UploadError::Internal(format!(
            "could not record chunk {} after {} attempts",
            index, MAX_CAS_ATTEMPTS
        )))
    }

    /// Received and missing indices of a live session.
    pub async fn status(&self, session_id: &str) -> ServiceResult<SessionStatusResponse> {
        let session = self.load(session_id).await?.value;
        Ok(SessionStatusResponse {
            session_id: session.session_id.clone(),
            file_name: session.sanitized_name.clone(),
            declared_size: session.declared_size,
            chunk_size: session.chunk_size,
            total_chunks: session.total_chunks,
            received: session.received_chunks.keys().copied().collect(),
            missing: session.missing_indices(),
            progress: session.progress(),
        })
    }

    /// Assemble and persist the artifact once every chunk is present.
    ///
    /// On any failure the session and its chunk files stay in place so the
    /// client can retry completion.
    pub async fn complete_upload(&self, session_id: &str) -> ServiceResult<UploadResult> {
        let session = self.load(session_id).await?.value;
        if !session.is_complete() {
            return Err(UploadError::Incomplete {
                missing: session.missing_indices(),
            });
        }

        let staged = self.staging_path(session_id);
        let (size, digest) = match assemble(&session, &staged).await {
            Ok(out) => out,
            Err(err) => {
                error!("assembly of {} failed: {}", short_id(session_id), err);
                remove_quietly(&staged).await;
                return Err(err);
            }
        };
        if size != session.declared_size {
            warn!(
                "session {} declared {} bytes but assembled {}",
                short_id(session_id),
                session.declared_size,
                size
            );
        }

        let location = match self.artifacts.persist(&session.final_name, &staged).await {
            Ok(location) => location,
            Err(err) => {
                error!(
                    "storing artifact {} failed: {}",
                    session.final_name, err
                );
                remove_quietly(&staged).await;
                return Err(err.into());
            }
        };

        // chunk files outlive the session record
        self.sessions.delete(session_id).await?;
        self.remove_chunk_files(&session).await;

        let needs_conversion = needs_conversion(&session.content_type, &session.final_name);
        info!(
            "Completed upload {} -> {} ({} bytes, needs_conversion={})",
            short_id(session_id),
            location,
            size,
            needs_conversion
        );

        Ok(UploadResult {
            id: session.session_id,
            file_name: session.final_name,
            location,
            size,
            content_type: session.content_type,
            etag: format!("{:x}", digest),
            needs_conversion,
            title: session.title,
            tags: session.tags,
        })
    }

    /// Release everything held for a session. Unknown ids succeed.
    pub async fn abort_upload(&self, session_id: &str) -> ServiceResult<AbortAck> {
        if is_valid_session_id(session_id) {
            match self.sessions.delete(session_id).await? {
                Some(session) => {
                    let removed = self.remove_chunk_files(&session).await;
                    info!(
                        "Aborted upload {} ({} chunk files removed)",
                        short_id(session_id),
                        removed
                    );
                }
                None => debug!("abort of unknown session {}", short_id(session_id)),
            }
            // chunk files written but never recorded
            self.remove_files_with_prefix(session_id).await;
        }

        Ok(AbortAck {
            session_id: session_id.to_string(),
            aborted: true,
        })
    }

    /// Store a small file in one request, bypassing sessions.
    pub async fn upload_single<S>(&self, meta: SingleUpload, body: S) -> ServiceResult<UploadResult>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let sanitized = sanitize_filename(&meta.file_name)
            .ok_or_else(|| UploadError::Validation("filename is required".into()))?;

        let id = new_session_id();
        let stored_name = final_name(&id, &sanitized);
        let staged = self.staging_path(&id);
        fs::create_dir_all(&self.temp_dir).await?;

        let (size, digest) = write_stream(&staged, body, self.limits.max_upload_size).await?;
        if size == 0 {
            remove_quietly(&staged).await;
            return Err(UploadError::Validation("file is empty".into()));
        }

        let location = match self.artifacts.persist(&stored_name, &staged).await {
            Ok(location) => location,
            Err(err) => {
                error!("storing artifact {} failed: {}", stored_name, err);
                remove_quietly(&staged).await;
                return Err(err.into());
            }
        };

        let content_type = normalize_content_type(meta.content_type.as_deref());
        let needs_conversion = needs_conversion(&content_type, &stored_name);
        info!(
            "Stored single-shot upload `{}` -> {} ({} bytes)",
            sanitized, location, size
        );

        Ok(UploadResult {
            id,
            file_name: stored_name,
            location,
            size,
            content_type,
            etag: format!("{:x}", digest),
            needs_conversion,
            title: meta.title.filter(|t| !t.trim().is_empty()),
            tags: clean_tags(meta.tags),
        })
    }

    /// Reclaim sessions idle since before `now - idle_timeout`, then orphaned
    /// chunk and staging files from sessions that no longer exist.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> ServiceResult<SweepReport> {
        let cutoff = now - self.limits.idle_timeout;
        let mut report = SweepReport::default();

        for Versioned { version, value } in self.sessions.list_idle(cutoff).await? {
            // listings are a candidate set; the ledger's own clock decides
            if !value.is_idle(now, self.limits.idle_timeout) {
                continue;
            }
            // a session touched since the listing keeps its newer version
            if self
                .sessions
                .delete_if_version(&value.session_id, version)
                .await?
            {
                report.sessions_removed += 1;
                report.chunk_files_removed += self.remove_chunk_files(&value).await;
                info!(
                    "Reclaimed idle upload session {} (last activity {})",
                    short_id(&value.session_id),
                    value.last_activity_at
                );
            } else {
                debug!(
                    "session {} changed during sweep, keeping it",
                    short_id(&value.session_id)
                );
            }
        }

        report.orphans_removed = self.remove_orphans(cutoff).await?;
        Ok(report)
    }

    async fn remove_orphans(&self, cutoff: DateTime<Utc>) -> ServiceResult<usize> {
        let mut entries = match fs::read_dir(&self.temp_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some((owner, _)) = name.split_once('.') else {
                continue;
            };
            if !is_valid_session_id(owner) {
                continue;
            }

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => DateTime::<Utc>::from(modified),
                Err(err) => {
                    debug!("cannot stat {}: {}", name, err);
                    continue;
                }
            };
            if modified >= cutoff || self.sessions.exists(owner).await? {
                continue;
            }

            match fs::remove_file(entry.path()).await {
                Ok(()) => removed += 1,
                Err(err) => warn!("failed to remove orphan {}: {}", name, err),
            }
        }
        Ok(removed)
    }

    async fn load(&self, session_id: &str) -> ServiceResult<Versioned<UploadSession>> {
        if !is_valid_session_id(session_id) {
            return Err(UploadError::NotFound(session_id.to_string()));
        }
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| UploadError::NotFound(session_id.to_string()))
    }

    fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.temp_dir.join(format!(
            "{}.{:06}.{}.chunk",
            session_id,
            index,
            Uuid::new_v4().simple()
        ))
    }

    fn staging_path(&self, id: &str) -> PathBuf {
        self.temp_dir
            .join(format!("{}.assembling.{}.part", id, Uuid::new_v4().simple()))
    }

    /// Delete every recorded chunk file. Failures are logged, not fatal.
    async fn remove_chunk_files(&self, session: &UploadSession) -> usize {
        let mut removed = 0;
        for (index, chunk) in &session.received_chunks {
            match fs::remove_file(&chunk.path).await {
                Ok(()) => removed += 1,
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(
                    "failed to remove chunk {} of {} at {}: {}",
                    index,
                    short_id(&session.session_id),
                    chunk.path.display(),
                    err
                ),
            }
        }
        removed
    }

    async fn remove_files_with_prefix(&self, session_id: &str) {
        let prefix = format!("{}.", session_id);
        let Ok(mut entries) = fs::read_dir(&self.temp_dir).await else {
            return;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|n| n.starts_with(&prefix) && n.ends_with(".chunk"));
            if matches {
                if let Err(err) = fs::remove_file(entry.path()).await {
                    warn!("failed to remove {}: {}", entry.path().display(), err);
                }
            }
        }
    }
}

/// Total the chunk must be checked against, without modifying the session.
fn effective_total(session: &UploadSession, declared: u32) -> ServiceResult<u32> {
    if session.total_confirmed && session.total_chunks != declared {
        return Err(UploadError::TotalMismatch {
            declared,
            expected: session.total_chunks,
        });
    }
    Ok(declared)
}

/// The first accepted chunk fixes the session total; later disagreement is a
/// conflict.
fn reconcile_total(session: &mut UploadSession, declared: u32) -> ServiceResult<()> {
    effective_total(session, declared)?;
    if !session.total_confirmed {
        if session.total_chunks != declared {
            warn!(
                "session {} estimated {} chunks but client declared {}; using declared",
                short_id(&session.session_id),
                session.total_chunks,
                declared
            );
        }
        session.total_chunks = declared;
        session.total_confirmed = true;
    }
    Ok(())
}

fn chunk_ack(session: &UploadSession, duplicate: bool) -> ChunkAck {
    ChunkAck {
        accepted: true,
        duplicate,
        received_chunks: session.received_count(),
        total_chunks: session.total_chunks,
        progress: session.progress(),
    }
}

/// Concatenate chunk files in index order into `dest`, returning the size and
/// MD5 of what was written.
async fn assemble(session: &UploadSession, dest: &Path) -> ServiceResult<(u64, md5::Digest)> {
    let mut out = File::create(dest).await?;
    let mut digest = Context::new();
    let mut size: u64 = 0;

    for index in 0..session.total_chunks {
        let chunk = session
            .received_chunks
            .get(&index)
            .ok_or_else(|| UploadError::MissingData(format!("chunk {} not recorded", index)))?;

        let file = File::open(&chunk.path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                UploadError::MissingData(format!("chunk {} file is gone", index))
            } else {
                UploadError::Io(err)
            }
        })?;

        let mut written: u64 = 0;
        let mut stream = ReaderStream::new(file);
        while let Some(bytes) = stream.next().await {
            let bytes = bytes?;
            digest.consume(&bytes);
            out.write_all(&bytes).await?;
            written += bytes.len() as u64;
        }
        if written != chunk.size {
            return Err(UploadError::MissingData(format!(
                "chunk {} holds {} bytes, expected {}",
                index, written, chunk.size
            )));
        }
        size += written;
    }

    out.flush().await?;
    out.sync_all().await?;
    Ok((size, digest.compute()))
}

/// Stream `body` into a new file at `path`, failing once more than `limit`
/// bytes arrive. The file is removed on any error.
async fn write_stream<S>(path: &Path, body: S, limit: u64) -> ServiceResult<(u64, md5::Digest)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut file = File::create(path).await?;
    let mut digest = Context::new();
    let mut size: u64 = 0;

    pin_mut!(body);
    while let Some(chunk_res) = body.next().await {
        let chunk = match chunk_res {
            Ok(chunk) => chunk,
            Err(err) => {
                remove_quietly(path).await;
                return Err(UploadError::BodyInterrupted(err));
            }
        };
        size += chunk.len() as u64;
        if size > limit {
            remove_quietly(path).await;
            return Err(UploadError::TooLarge { size, limit });
        }
        digest.consume(&chunk);
        if let Err(err) = file.write_all(&chunk).await {
            remove_quietly(path).await;
            return Err(UploadError::Io(err));
        }
    }
    if let Err(err) = file.flush().await {
        remove_quietly(path).await;
        return Err(UploadError::Io(err));
    }
    if let Err(err) = file.sync_all().await {
        remove_quietly(path).await;
        return Err(UploadError::Io(err));
    }

    Ok((size, digest.compute()))
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            warn!("failed to remove {}: {}", path.display(), err);
        }
    }
}

/// 256 bits from the thread-local CSPRNG, base64url without padding.
pub fn new_session_id() -> String {
    let mut bytes = [0u8; SESSION_ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn is_valid_session_id(id: &str) -> bool {
    id.len() == SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Whether the stored format must be transcoded before it is playable.
pub fn needs_conversion(content_type: &str, stored_name: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    if PLAYABLE_CONTENT_TYPES.contains(&ct.as_str()) {
        return false;
    }
    let generic = ct.is_empty() || ct == DEFAULT_CONTENT_TYPE;
    let ext = stored_name
        .rsplit_once('.')
        .map(|(_, e)| e.to_ascii_lowercase());
    !(generic && ext.is_some_and(|e| PLAYABLE_EXTENSIONS.contains(&e.as_str())))
}

/// Lower-case MIME type without parameters; generic when absent.
fn normalize_content_type(raw: Option<&str>) -> String {
    raw.and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .filter(|ct| !ct.is_empty())
        .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string())
}

fn clean_tags(tags: Vec<String>) -> Vec<String> {
    tags.into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Session ids are credentials; logs only carry a prefix.
fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}
