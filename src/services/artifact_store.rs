//! Final artifact storage.
//!
//! The upload service assembles artifacts into a staged file and then hands
//! it to an [`ArtifactStore`]. Backend failures surface as errors; they are
//! never papered over by writing somewhere else.

use async_trait::async_trait;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::fs::{self, File};
use tracing::debug;
use uuid::Uuid;

use crate::services::filename::is_safe_storage_name;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("artifact `{0}` not found")]
    NotFound(String),
    #[error("invalid artifact name `{0}`")]
    InvalidName(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Move `staged` into the store under `name`; returns the public location.
    async fn persist(&self, name: &str, staged: &Path) -> Result<String, ArtifactError>;

    /// Open a stored artifact for reading, with its length.
    async fn open(&self, name: &str) -> Result<(File, u64), ArtifactError>;

    /// Write/read/delete probe used by readiness checks.
    async fn probe(&self) -> Result<(), ArtifactError>;
}

/// Artifacts stored as plain files under one root directory.
#[derive(Clone, Debug)]
pub struct LocalArtifactStore {
    root: PathBuf,
    public_base_url: String,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        if !is_safe_storage_name(name) {
            return Err(ArtifactError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(name))
    }

    fn location_for(&self, name: &str) -> String {
        format!("{}/{}", self.public_base_url, name)
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn persist(&self, name: &str, staged: &Path) -> Result<String, ArtifactError> {
        let dest = self.path_for(name)?;
        fs::create_dir_all(&self.root).await?;

        match fs::rename(staged, &dest).await {
            Ok(()) => {}
            // staging and storage live on different filesystems
            Err(err) if err.kind() == ErrorKind::CrossesDevices => {
                debug!("rename crosses devices, copying {} instead", staged.display());
                let tmp = self.root.join(format!(".tmp-{}", Uuid::new_v4()));
                if let Err(err) = fs::copy(staged, &tmp).await {
                    let _ = fs::remove_file(&tmp).await;
                    return Err(err.into());
                }
                File::open(&tmp).await?.sync_all().await?;
                fs::rename(&tmp, &dest).await?;
                let _ = fs::remove_file(staged).await;
            }
            Err(err) => return Err(err.into()),
        }

        Ok(self.location_for(name))
    }

    async fn open(&self, name: &str) -> Result<(File, u64), ArtifactError> {
        let path = self.path_for(name)?;
        let file = File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                ArtifactError::NotFound(name.to_string())
            } else {
                ArtifactError::Io(err)
            }
        })?;
        let len = file.metadata().await?.len();
        Ok((file, len))
    }

    async fn probe(&self) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.root).await?;
        probe_dir(&self.root).await.map_err(ArtifactError::Io)
    }
}

/// Best-effort write/read/delete of a scratch file under `dir`.
pub async fn probe_dir(dir: &Path) -> io::Result<()> {
    let tmp_path = dir.join(format!(".readyz-{}", Uuid::new_v4()));
    fs::write(&tmp_path, b"readyz").await?;
    let bytes = fs::read(&tmp_path).await;
    let _ = fs::remove_file(&tmp_path).await;
    if bytes? != b"readyz" {
        return Err(io::Error::new(ErrorKind::Other, "file content mismatch"));
    }
    Ok(())
}
