//! Session ledger storage.
//!
//! Every mutation of a session goes through [`SessionStore::compare_and_swap`]
//! (or a versioned delete), so concurrent chunk uploads for the same session
//! never lose an update regardless of which backend or process handles them.

use crate::models::session::UploadSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session `{0}` already exists")]
    AlreadyExists(String),
    #[error("session payload is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A value together with the version it was read at.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned<T> {
    pub version: i64,
    pub value: T,
}

/// Keyed store of upload sessions with optimistic concurrency.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a brand new session at version 1.
    async fn insert(&self, session: &UploadSession) -> StoreResult<()>;

    async fn get(&self, id: &str) -> StoreResult<Option<Versioned<UploadSession>>>;

    /// Replace the session if its stored version is still `expected_version`.
    ///
    /// Returns `false` when the session changed or disappeared in between.
    async fn compare_and_swap(
        &self,
        expected_version: i64,
        session: &UploadSession,
    ) -> StoreResult<bool>;

    /// Remove a session unconditionally, returning what was stored.
    async fn delete(&self, id: &str) -> StoreResult<Option<UploadSession>>;

    /// Remove a session only if nobody touched it since `expected_version`.
    async fn delete_if_version(&self, id: &str, expected_version: i64) -> StoreResult<bool>;

    /// Sessions whose last activity is strictly before `cutoff`.
    async fn list_idle(&self, cutoff: DateTime<Utc>)
    -> StoreResult<Vec<Versioned<UploadSession>>>;

    async fn exists(&self, id: &str) -> StoreResult<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// Cheap connectivity check for readiness probes.
    async fn ping(&self) -> StoreResult<()>;
}

/// In-process store. Sessions are lost on restart and invisible to other
/// processes; use it for tests and single-instance development.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Versioned<UploadSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert(&self, session: &UploadSession) -> StoreResult<()> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&session.session_id) {
            return Err(StoreError::AlreadyExists(session.session_id.clone()));
        }
        sessions.insert(
            session.session_id.clone(),
            Versioned {
                version: 1,
                value: session.clone(),
            },
        );
        Ok(())
    }

    async fn get(&self, id: &str) -> StoreResult<Option<Versioned<UploadSession>>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }

    async fn compare_and_swap(
        &self,
        expected_version: i64,
        session: &UploadSession,
    ) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&session.session_id) {
            Some(current) if current.version == expected_version => {
                current.version += 1;
                current.value = session.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete(&self, id: &str) -> StoreResult<Option<UploadSession>> {
        Ok(self.sessions.write().await.remove(id).map(|v| v.value))
    }

    async fn delete_if_version(&self, id: &str, expected_version: i64) -> StoreResult<bool> {
        let mut sessions = self.sessions.write().await;
        match sessions.get(id) {
            Some(current) if current.version == expected_version => {
                sessions.remove(id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_idle(
        &self,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Vec<Versioned<UploadSession>>> {
        Ok(self
            .sessions
            .read()
            .await
            .values()
            .filter(|v| v.value.last_activity_at < cutoff)
            .cloned()
            .collect())
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::session::ChunkRecord;
    use chrono::Duration;
    use std::{collections::BTreeMap, path::PathBuf};

    pub(crate) fn sample_session(id: &str) -> UploadSession {
        let now = Utc::now();
        UploadSession {
            session_id: id.into(),
            original_name: "clip.mp4".into(),
            sanitized_name: "clip.mp4".into(),
            final_name: format!("{}.mp4", id),
            declared_size: 8,
            content_type: "video/mp4".into(),
            title: Some("title".into()),
            tags: vec!["a".into()],
            chunk_size: 4,
            total_chunks: 2,
            total_confirmed: false,
            received_chunks: BTreeMap::new(),
            created_at: now,
            last_activity_at: now,
        }
    }

    /// Shared contract every backend must satisfy.
    pub(crate) async fn exercise_store(store: &dyn SessionStore) {
        let s = sample_session("s1");
        store.insert(&s).await.unwrap();
        assert!(matches!(
            store.insert(&s).await,
            Err(StoreError::AlreadyExists(_))
        ));

        let got = store.get("s1").await.unwrap().unwrap();
        assert_eq!(got.version, 1);
        assert_eq!(got.value, s);
        assert!(store.exists("s1").await.unwrap());
        assert!(store.get("nope").await.unwrap().is_none());

        let mut next = got.value.clone();
        next.received_chunks.insert(
            0,
            ChunkRecord {
                size: 4,
                path: PathBuf::from("/tmp/s1-0"),
                received_at: Utc::now(),
            },
        );
        assert!(store.compare_and_swap(1, &next).await.unwrap());
        // stale version loses
        assert!(!store.compare_and_swap(1, &next).await.unwrap());

        let got = store.get("s1").await.unwrap().unwrap();
        assert_eq!(got.version, 2);
        assert_eq!(got.value.received_count(), 1);

        assert!(!store.delete_if_version("s1", 1).await.unwrap());
        assert!(store.exists("s1").await.unwrap());

        let mut idle = sample_session("s2");
        idle.last_activity_at = Utc::now() - Duration::hours(2);
        store.insert(&idle).await.unwrap();
        let listed = store
            .list_idle(Utc::now() - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].value.session_id, "s2");
        assert!(store.delete_if_version("s2", listed[0].version).await.unwrap());

        let removed = store.delete("s1").await.unwrap().unwrap();
        assert_eq!(removed.received_count(), 1);
        assert!(store.delete("s1").await.unwrap().is_none());
        assert!(!store.compare_and_swap(2, &next).await.unwrap());
        store.ping().await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_store_contract() {
        let store = MemorySessionStore::new();
        exercise_store(&store).await;
    }
}
