use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::warn;

use crate::error::StoreError;
use crate::strategy::StorageStrategy;

/// Single-JSON-document storage strategy: the whole entity collection lives
/// in one file, keyed by id, loaded and rewritten in full on every mutation.
///
/// Read the whole document, mutate the in-memory map, write it back via a
/// temp file + atomic rename, keeping a `.bak` copy of the previous document
/// so a crash mid-write never loses the last good state. An in-process
/// `RwLock` serializes writers against each other and against readers; the
/// file itself has no external locking since the broker owns the directory.
pub struct FileStorageStrategy {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileStorageStrategy {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    fn backup_path(&self) -> PathBuf {
        let mut p = self.path.clone();
        let mut name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".bak");
        p.set_file_name(name);
        p
    }

    fn tmp_path(&self) -> PathBuf {
        let mut p = self.path.clone();
        let mut name = p
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        name.push_str(".tmp");
        p.set_file_name(name);
        p
    }

    async fn load(&self) -> Result<HashMap<String, Value>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(map) => Ok(map),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "primary document corrupt, attempting backup recovery"
                    );
                    self.load_backup().await
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(StoreError::Io {
                path: self.path.display().to_string(),
                source: e,
            }),
        }
    }

    async fn load_backup(&self) -> Result<HashMap<String, Value>, StoreError> {
        let backup = self.backup_path();
        match tokio::fs::read(&backup).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StoreError::BackupRecoveryFailed {
                    path: backup.display().to_string(),
                    message: e.to_string(),
                }
            }),
            Err(_) => Ok(HashMap::new()),
        }
    }

    async fn persist(&self, data: &HashMap<String, Value>) -> Result<(), StoreError> {
        if let Ok(existing) = tokio::fs::read(&self.path).await {
            let _ = tokio::fs::write(self.backup_path(), existing).await;
        }
        let serialized = serde_json::to_vec_pretty(data)?;
        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &serialized)
            .await
            .map_err(|e| StoreError::Io {
                path: tmp.display().to_string(),
                source: e,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Io {
                path: self.path.display().to_string(),
                source: e,
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl StorageStrategy for FileStorageStrategy {
    async fn save(&self, id: &str, blob: Value) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut data = self.load().await?;
        data.insert(id.to_string(), blob);
        self.persist(&data).await
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Value>, StoreError> {
        let _guard = self.lock.read().await;
        Ok(self.load().await?.get(id).cloned())
    }

    async fn find_all(&self) -> Result<HashMap<String, Value>, StoreError> {
        let _guard = self.lock.read().await;
        self.load().await
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut data = self.load().await?;
        data.remove(id);
        self.persist(&data).await
    }

    async fn save_batch(&self, items: Vec<(String, Value)>) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut data = self.load().await?;
        for (id, blob) in items {
            data.insert(id, blob);
        }
        self.persist(&data).await
    }

    async fn delete_batch(&self, ids: Vec<String>) -> Result<(), StoreError> {
        let _guard = self.lock.write().await;
        let mut data = self.load().await?;
        for id in ids {
            data.remove(&id);
        }
        self.persist(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn strategy() -> (FileStorageStrategy, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.json");
        (FileStorageStrategy::new(path), dir)
    }

    #[tokio::test]
    async fn save_then_find_by_id_round_trips() {
        let (s, _dir) = strategy();
        s.save("req-1", json!({"status": "Pending"})).await.unwrap();
        let found = s.find_by_id("req-1").await.unwrap();
        assert_eq!(found, Some(json!({"status": "Pending"})));
    }

    #[tokio::test]
    async fn missing_document_yields_empty_map_not_error() {
        let (s, _dir) = strategy();
        assert_eq!(s.find_all().await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn delete_removes_entry() {
        let (s, _dir) = strategy();
        s.save("req-1", json!({})).await.unwrap();
        s.delete("req-1").await.unwrap();
        assert!(s.find_by_id("req-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_primary_document_falls_back_to_backup() {
        let (s, _dir) = strategy();
        s.save("req-1", json!({"status": "Pending"})).await.unwrap();
        s.save("req-1", json!({"status": "Running"})).await.unwrap();
        tokio::fs::write(s.path(), b"not json").await.unwrap();
        let recovered = s.find_all().await.unwrap();
        assert_eq!(
            recovered.get("req-1"),
            Some(&json!({"status": "Pending"}))
        );
    }

    #[tokio::test]
    async fn save_batch_writes_all_items_in_one_pass() {
        let (s, _dir) = strategy();
        s.save_batch(vec![
            ("req-1".to_string(), json!({"status": "Pending"})),
            ("req-2".to_string(), json!({"status": "Running"})),
        ])
        .await
        .unwrap();
        assert_eq!(s.find_all().await.unwrap().len(), 2);
    }
}
