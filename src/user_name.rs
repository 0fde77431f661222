//! User name value with change notification.
//!
//! The value lives in a `watch` channel; when a file path is configured every
//! update is persisted there (JSON) before it becomes visible.

use crate::error::StoreError;
use crate::operation::Operation;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};

/// Source of the user name as seen by a screen.
pub trait UserNameSource: Send + Sync {
    /// Current value on subscribe, then every change.
    fn observe(&self) -> BoxStream<'static, Result<String, StoreError>>;

    /// Replace the value. Completes once it is persisted.
    fn update(&self, name: String) -> Operation<(), StoreError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRecord {
    user_name: String,
}

#[derive(Clone)]
pub struct UserNameStore {
    value: Arc<watch::Sender<String>>,
    path: Option<PathBuf>,
    /// Serializes file writes so the last update wins on disk too.
    write_lock: Arc<Mutex<()>>,
}

impl UserNameStore {
    pub fn in_memory(initial: impl Into<String>) -> Self {
        Self::from_parts(initial.into(), None)
    }

    /// Open a file-backed store, starting empty when the file does not exist yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let initial = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice::<UserRecord>(&bytes)?.user_name,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "user name store opened");
        Ok(Self::from_parts(initial, Some(path)))
    }

    /// `<data dir>/server-manager-cli/user.json`, when the platform has a data dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("server-manager-cli").join("user.json"))
    }

    pub(crate) fn from_parts(initial: String, path: Option<PathBuf>) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            value: Arc::new(tx),
            path,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn current(&self) -> String {
        self.value.borrow().clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

async fn persist(path: &Path, name: &str) -> Result<(), StoreError> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    let bytes = serde_json::to_vec_pretty(&UserRecord {
        user_name: name.to_string(),
    })?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

impl UserNameSource for UserNameStore {
    fn observe(&self) -> BoxStream<'static, Result<String, StoreError>> {
        let rx = self.value.subscribe();
        stream::unfold((rx, true), |(mut rx, first)| async move {
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let value = rx.borrow_and_update().clone();
            Some((Ok(value), (rx, false)))
        })
        .boxed()
    }

    fn update(&self, name: String) -> Operation<(), StoreError> {
        let store = self.clone();
        Operation::new(async move {
            let _guard = store.write_lock.lock().await;
            if let Some(path) = store.path.as_deref() {
                persist(path, &name).await?;
            }
            info!("user name updated");
            store.value.send_replace(name);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SubscriptionRegistry;
    use std::time::Duration;

    #[tokio::test]
    async fn observe_emits_current_then_changes() {
        let store = UserNameStore::in_memory("ada");
        let mut names = store.observe();

        assert_eq!(names.next().await.unwrap().unwrap(), "ada");
        store.update("grace".into()).await.unwrap();
        assert_eq!(names.next().await.unwrap().unwrap(), "grace");
        assert_eq!(store.current(), "grace");
    }

    #[tokio::test]
    async fn file_store_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("user.json");

        let store = UserNameStore::open(&path).unwrap();
        assert_eq!(store.current(), "");
        store.update("linus".into()).await.unwrap();

        let reopened = UserNameStore::open(&path).unwrap();
        assert_eq!(reopened.current(), "linus");
    }

    #[tokio::test]
    async fn failed_persist_keeps_old_value() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be makes the rename fail.
        let path = dir.path().join("user.json");
        std::fs::create_dir_all(path.join("occupied")).unwrap();
        let store = UserNameStore::from_parts("before".into(), Some(path.clone()));

        let err = store.update("after".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert_eq!(store.current(), "before");
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_file_is_a_serialize_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(UserNameStore::open(&path), Err(StoreError::Serialize(_))));
    }

    #[tokio::test]
    async fn binds_through_registry_like_any_operation() {
        let store = UserNameStore::in_memory("first");
        let (registry, mut queue) = SubscriptionRegistry::<Vec<String>>::new();
        let mut seen = Vec::new();

        registry.add_stream(store.observe(), |s: &mut Vec<String>, v| s.push(v), |_s: &mut Vec<String>, _e| {});
        assert!(queue.deliver_next(&mut seen).await);

        registry.add(
            store.update("second".into()),
            |s: &mut Vec<String>, ()| s.push("saved".into()),
            |_s: &mut Vec<String>, _e| {},
        );
        while seen.len() < 3 {
            tokio::time::timeout(Duration::from_secs(2), queue.deliver_next(&mut seen))
                .await
                .unwrap();
        }
        seen.sort();
        assert_eq!(seen, vec!["first", "saved", "second"]);

        registry.cancel_all();
        store.update("third".into()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.try_deliver(&mut seen), 0);
    }
}
