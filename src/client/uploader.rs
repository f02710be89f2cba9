//! Client half of the upload protocol.
//!
//! Small files go up in one multipart request. Larger files are split into
//! chunks: `init`, one `PUT` per chunk, then `complete`. Every request is
//! retried with backoff; a failed or cancelled upload releases its server
//! session with a best-effort abort.

use crate::{
    client::{
        error::{ClientError, ClientResult},
        retry::{RetryPolicy, retry},
    },
    models::{
        protocol::{AbortAck, ChunkAck, InitUploadRequest, InitUploadResponse},
        upload::UploadResult,
    },
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use std::{
    io::SeekFrom,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncSeekExt},
};
use tracing::{debug, info, warn};

pub const MIN_CHUNK_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_CHUNK_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_CHUNK_SIZE: u64 = 50 * 1024 * 1024;
pub const TARGET_CHUNKS: u64 = 100;

/// Picks the chunk size to propose for a file.
#[derive(Debug, Clone)]
pub struct ChunkSizePolicy {
    pub default_size: u64,
    pub min_size: u64,
    pub max_size: u64,
    /// Large files grow their chunks to stay near this many requests.
    pub target_chunks: u64,
}

impl Default for ChunkSizePolicy {
    fn default() -> Self {
        Self {
            default_size: DEFAULT_CHUNK_SIZE,
            min_size: MIN_CHUNK_SIZE,
            max_size: MAX_CHUNK_SIZE,
            target_chunks: TARGET_CHUNKS,
        }
    }
}

impl ChunkSizePolicy {
    pub fn for_file(&self, size: u64) -> u64 {
        size.div_ceil(self.target_chunks.max(1))
            .max(self.default_size)
            .clamp(self.min_size, self.max_size)
    }
}

#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub server_url: String,
    pub chunk_policy: ChunkSizePolicy,
    pub retry: RetryPolicy,
    /// Uploads with at most this many chunks send them concurrently.
    pub parallel_threshold: u32,
    /// Concurrent chunk requests in parallel mode.
    pub max_in_flight: usize,
    pub request_timeout: Duration,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3000".into(),
            chunk_policy: ChunkSizePolicy::default(),
            retry: RetryPolicy::default(),
            parallel_threshold: 4,
            max_in_flight: 3,
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// Free-text metadata sent along with the file.
#[derive(Debug, Clone, Default)]
pub struct UploadMetadata {
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
    pub chunks_done: u32,
    pub total_chunks: u32,
}

impl UploadProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            return 1.0;
        }
        self.bytes_uploaded as f64 / self.total_bytes as f64
    }
}

/// Cooperative cancellation flag shared with whoever wants to stop an upload.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Uploader {
    client: reqwest::Client,
    base_url: String,
    config: UploaderConfig,
    abort: AbortHandle,
}

impl Uploader {
    pub fn new(config: UploaderConfig) -> ClientResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ClientError::Transport(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            config,
            abort: AbortHandle::default(),
        })
    }

    /// Handle that stops the upload: no new request is issued once it fires,
    /// in-flight requests finish.
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Upload the file at `path`, reporting progress after every accepted
    /// chunk.
    pub async fn upload<P>(
        &self,
        path: &Path,
        meta: UploadMetadata,
        mut on_progress: P,
    ) -> ClientResult<UploadResult>
    where
        P: FnMut(UploadProgress),
    {
        let size = fs::metadata(path).await?.len();
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("upload")
            .to_string();

        let chunk_size = self.config.chunk_policy.for_file(size);
        if size <= chunk_size {
            let result = self.upload_single(path, &filename, &meta).await?;
            on_progress(UploadProgress {
                bytes_uploaded: size,
                total_bytes: size,
                chunks_done: 1,
                total_chunks: 1,
            });
            return Ok(result);
        }

        let init = self
            .init(&InitUploadRequest {
                filename,
                size,
                content_type: meta.content_type.clone(),
                title: meta.title.clone(),
                tags: meta.tags.clone(),
                chunk_size: Some(chunk_size),
            })
            .await?;

        match self.upload_chunks(path, size, &init, &mut on_progress).await {
            Ok(result) => Ok(result),
            Err(err) => {
                warn!(
                    "upload of {} failed ({}): {}; releasing session",
                    path.display(),
                    err.kind(),
                    err
                );
                self.release(&init.session_id).await;
                Err(err)
            }
        }
    }

    async fn upload_chunks<P>(
        &self,
        path: &Path,
        size: u64,
        init: &InitUploadResponse,
        on_progress: &mut P,
    ) -> ClientResult<UploadResult>
    where
        P: FnMut(UploadProgress),
    {
        let chunk_size = init.chunk_size;
        let total = init.total_chunks;
        let mut progress = UploadProgress {
            bytes_uploaded: 0,
            total_bytes: size,
            chunks_done: 0,
            total_chunks: total,
        };

        info!(
            "uploading {} ({} bytes) as {} chunks of {}",
            path.display(),
            size,
            total,
            chunk_size
        );

        let send = |index: u32| async move {
            let data = read_chunk(path, index, chunk_size, size).await?;
            let len = data.len() as u64;
            self.send_chunk(&init.session_id, index, total, data).await?;
            Ok::<u64, ClientError>(len)
        };

        if total <= self.config.parallel_threshold {
            let mut in_flight = stream::iter(0..total)
                .map(&send)
                .buffer_unordered(self.config.max_in_flight.max(1));
            while let Some(sent) = in_flight.next().await {
                progress.bytes_uploaded += sent?;
                progress.chunks_done += 1;
                on_progress(progress);
            }
        } else {
            for index in 0..total {
                progress.bytes_uploaded += send(index).await?;
                progress.chunks_done += 1;
                on_progress(progress);
            }
        }

        match self.complete(&init.session_id).await {
            Err(ClientError::Rejected {
                missing_chunks: Some(missing),
                ..
            }) if !missing.is_empty() => {
                // the server lost track of some chunks; send them once more
                warn!("server reports {} missing chunks, resending", missing.len());
                for index in missing {
                    send(index).await?;
                }
                self.complete(&init.session_id).await
            }
            other => other,
        }
    }

    async fn upload_single(
        &self,
        path: &Path,
        filename: &str,
        meta: &UploadMetadata,
    ) -> ClientResult<UploadResult> {
        let data = Bytes::from(fs::read(path).await?);
        let url = format!("{}/uploads", self.base_url);
        let url = url.as_str();
        debug!("single-shot upload of {} bytes", data.len());

        retry(&self.config.retry, "upload", || self.abort.is_aborted(), move || {
            let data = data.clone();
            async move {
                let mut part = Part::stream(reqwest::Body::from(data)).file_name(filename.to_string());
                if let Some(ct) = meta.content_type.as_deref() {
                    part = part
                        .mime_str(ct)
                        .map_err(|e| ClientError::Transport(e.to_string()))?;
                }
                let mut form = Form::new();
                if let Some(title) = meta.title.as_deref() {
                    form = form.text("title", title.to_string());
                }
                if !meta.tags.is_empty() {
                    form = form.text("tags", meta.tags.join(","));
                }
                let form = form.part("file", part);

                let resp = self.client.post(url).multipart(form).send().await?;
                parse_json(resp).await
            }
        })
        .await
    }

    async fn init(&self, req: &InitUploadRequest) -> ClientResult<InitUploadResponse> {
        let url = format!("{}/uploads/init", self.base_url);
        let url = url.as_str();
        retry(&self.config.retry, "init", || self.abort.is_aborted(), move || async move {
            let resp = self.client.post(url).json(req).send().await?;
            parse_json(resp).await
        })
        .await
    }

    async fn send_chunk(
        &self,
        session_id: &str,
        index: u32,
        total: u32,
        data: Bytes,
    ) -> ClientResult<ChunkAck> {
        let url = format!("{}/uploads/{}/chunks/{}", self.base_url, session_id, index);
        let url = url.as_str();
        let op = format!("chunk {}", index);
        retry(&self.config.retry, &op, || self.abort.is_aborted(), move || {
            let data = data.clone();
            async move {
                let resp = self
                    .client
                    .put(url)
                    .query(&[("total_chunks", total)])
                    .body(data)
                    .send()
                    .await?;
                parse_json(resp).await
            }
        })
        .await
    }

    async fn complete(&self, session_id: &str) -> ClientResult<UploadResult> {
        let url = format!("{}/uploads/{}/complete", self.base_url, session_id);
        let url = url.as_str();
        retry(&self.config.retry, "complete", || self.abort.is_aborted(), move || async move {
            let resp = self.client.post(url).send().await?;
            parse_json(resp).await
        })
        .await
    }

    /// Best-effort `DELETE` of a session; runs even after [`abort`](Self::abort).
    async fn release(&self, session_id: &str) {
        let url = format!("{}/uploads/{}", self.base_url, session_id);
        let url = url.as_str();
        let outcome = retry(&self.config.retry, "abort", || false, move || async move {
            let resp = self.client.delete(url).send().await?;
            parse_json::<AbortAck>(resp).await
        })
        .await;
        if let Err(err) = outcome {
            warn!("could not release upload session: {}", err);
        }
    }
}

async fn parse_json<T: DeserializeOwned>(resp: reqwest::Response) -> ClientResult<T> {
    if !resp.status().is_success() {
        return Err(ClientError::from_response(resp).await);
    }
    Ok(resp.json::<T>().await?)
}

/// Read chunk `index` of a file of `size` bytes.
async fn read_chunk(path: &Path, index: u32, chunk_size: u64, size: u64) -> ClientResult<Bytes> {
    let offset = u64::from(index) * chunk_size;
    let len = chunk_size.min(size.saturating_sub(offset));
    let mut file = File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buf = vec![0u8; len as usize];
    file.read_exact(&mut buf).await?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        routes::routes::routes,
        services::{
            artifact_store::LocalArtifactStore,
            session_store::{MemorySessionStore, SessionStore},
            upload_service::{UploadLimits, UploadService},
        },
    };
    use chrono::Utc;
    use tempfile::TempDir;
    use tokio::net::TcpListener;

    struct Server {
        dir: TempDir,
        url: String,
        sessions: Arc<MemorySessionStore>,
    }

    async fn start_server() -> Server {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(MemorySessionStore::new());
        let limits = UploadLimits {
            chunk_size: 4,
            min_chunk_size: 1,
            max_chunk_size: 1024,
            max_upload_size: 1024 * 1024,
            ..UploadLimits::default()
        };
        let service = UploadService::new(
            sessions.clone(),
            Arc::new(LocalArtifactStore::new(dir.path().join("files"), "/files")),
            dir.path().join("chunks"),
            limits.clone(),
        );
        let app = routes(&limits).with_state(service);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        Server { dir, url, sessions }
    }

    fn config(url: &str, parallel_threshold: u32) -> UploaderConfig {
        UploaderConfig {
            server_url: url.to_string(),
            chunk_policy: ChunkSizePolicy {
                default_size: 4,
                min_size: 1,
                max_size: 1024,
                target_chunks: 100,
            },
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            parallel_threshold,
            max_in_flight: 3,
            request_timeout: Duration::from_secs(10),
        }
    }

    fn write_file(dir: &TempDir, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn live_sessions(server: &Server) -> usize {
        server
            .sessions
            .list_idle(Utc::now() + chrono::Duration::days(1))
            .await
            .unwrap()
            .len()
    }

    #[test]
    fn test_chunk_size_policy() {
        let policy = ChunkSizePolicy::default();
        assert_eq!(policy.for_file(1), DEFAULT_CHUNK_SIZE);
        assert_eq!(policy.for_file(400 * 1024 * 1024), DEFAULT_CHUNK_SIZE);
        assert_eq!(policy.for_file(2000 * 1024 * 1024), 20 * 1024 * 1024);
        assert_eq!(policy.for_file(100 * 1024 * 1024 * 1024), MAX_CHUNK_SIZE);
    }

    #[tokio::test]
    async fn test_read_chunk_slices() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "f", b"abcdefghij");
        assert_eq!(&read_chunk(&path, 0, 4, 10).await.unwrap()[..], b"abcd");
        assert_eq!(&read_chunk(&path, 2, 4, 10).await.unwrap()[..], b"ij");
    }

    #[tokio::test]
    async fn test_parallel_chunked_upload() {
        let server = start_server().await;
        let data = b"0123456789ab".to_vec();
        let path = write_file(&server.dir, "clip.mp4", &data);

        let uploader = Uploader::new(config(&server.url, 4)).unwrap();
        let mut seen = Vec::new();
        let result = uploader
            .upload(&path, UploadMetadata::default(), |p| seen.push(p))
            .await
            .unwrap();

        assert_eq!(result.size, 12);
        assert!(!result.needs_conversion);
        let stored = std::fs::read(server.dir.path().join("files").join(&result.file_name)).unwrap();
        assert_eq!(stored, data);

        assert_eq!(seen.len(), 3);
        assert!(seen.windows(2).all(|w| w[0].bytes_uploaded <= w[1].bytes_uploaded));
        assert_eq!(seen.last().unwrap().bytes_uploaded, 12);
        assert_eq!(live_sessions(&server).await, 0);
    }

    #[tokio::test]
    async fn test_sequential_chunked_upload() {
        let server = start_server().await;
        let data: Vec<u8> = (0..50u8).collect();
        let path = write_file(&server.dir, "clip.mov", &data);

        let uploader = Uploader::new(config(&server.url, 0)).unwrap();
        let meta = UploadMetadata {
            title: Some("Trip".into()),
            tags: vec!["a".into()],
            content_type: Some("video/quicktime".into()),
        };
        let mut chunks = 0;
        let result = uploader
            .upload(&path, meta, |p| chunks = p.chunks_done)
            .await
            .unwrap();

        assert_eq!(chunks, 13);
        assert!(result.needs_conversion);
        assert_eq!(result.title.as_deref(), Some("Trip"));
        let stored = std::fs::read(server.dir.path().join("files").join(&result.file_name)).unwrap();
        assert_eq!(stored, data);
    }

    #[tokio::test]
    async fn test_small_file_goes_single_shot() {
        let server = start_server().await;
        let path = write_file(&server.dir, "tiny.webm", b"abc");
        let uploader = Uploader::new(config(&server.url, 4)).unwrap();
        let meta = UploadMetadata {
            title: Some("Tiny".into()),
            tags: vec!["x".into(), "y".into()],
            content_type: Some("video/webm".into()),
        };
        let result = uploader.upload(&path, meta, |_| {}).await.unwrap();
        assert_eq!(result.size, 3);
        assert_eq!(result.tags, vec!["x".to_string(), "y".to_string()]);
        assert!(!result.needs_conversion);
    }

    #[tokio::test]
    async fn test_abort_mid_upload_releases_session() {
        let server = start_server().await;
        let data = vec![7u8; 40];
        let path = write_file(&server.dir, "clip.mp4", &data);

        let uploader = Uploader::new(config(&server.url, 0)).unwrap();
        let handle = uploader.abort_handle();
        let err = uploader
            .upload(&path, UploadMetadata::default(), |p| {
                if p.chunks_done == 2 {
                    handle.abort();
                }
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "aborted");
        assert_eq!(live_sessions(&server).await, 0);
        let leftovers = std::fs::read_dir(server.dir.path().join("chunks"))
            .map(|rd| rd.count())
            .unwrap_or(0);
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "clip.mp4", &[1u8; 20]);
        let uploader = Uploader::new(config(&url, 4)).unwrap();
        let err = uploader
            .upload(&path, UploadMetadata::default(), |_| {})
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}
