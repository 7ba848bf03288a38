use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use super::paths::partial_path;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode sync state: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What was observed for one tracked file at its last successful sync.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncRecord {
    #[serde(default)]
    pub local_fingerprint: Option<String>,
    #[serde(default)]
    pub remote_fingerprint: Option<String>,
    #[serde(default)]
    pub remote_modified_at: Option<i64>,
    #[serde(default)]
    pub last_sync_at: i64,
}

/// The remote folder resolved for this workspace, and what it was resolved from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct ContainerBinding {
    name: String,
    parent: String,
    id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    container: Option<ContainerBinding>,
    #[serde(default)]
    records: HashMap<String, SyncRecord>,
}

/// JSON-backed store of [`SyncRecord`]s for one workspace.
///
/// The in-memory copy and the file are updated together under one lock, so
/// concurrent transfer tasks never interleave a read-modify-write.
pub struct StateStore {
    path: PathBuf,
    document: Mutex<StateDocument>,
}

impl StateStore {
    /// Opens the store at `path`. A missing or unreadable document starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = read_document(&path).await;
        Self {
            path,
            document: Mutex::new(document),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-reads the document from disk and returns its records.
    pub async fn load(&self) -> HashMap<String, SyncRecord> {
        let mut document = self.document.lock().await;
        *document = read_document(&self.path).await;
        document.records.clone()
    }

    /// Replaces every record and persists the document.
    pub async fn save(&self, records: HashMap<String, SyncRecord>) -> Result<(), StateError> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        next.records = records;
        write_document(&self.path, &next).await?;
        *document = next;
        Ok(())
    }

    pub async fn record(&self, file_key: &str) -> Option<SyncRecord> {
        self.document.lock().await.records.get(file_key).cloned()
    }

    /// Writes one record. The in-memory copy only changes once the file is on disk.
    pub async fn put_record(&self, file_key: &str, record: SyncRecord) -> Result<(), StateError> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        next.records.insert(file_key.to_string(), record);
        write_document(&self.path, &next).await?;
        *document = next;
        Ok(())
    }

    /// Container id persisted for `name` under `parent`, if one was resolved before.
    pub async fn container_id(&self, name: &str, parent: &str) -> Option<String> {
        self.document
            .lock()
            .await
            .container
            .as_ref()
            .filter(|binding| binding.name == name && binding.parent == parent)
            .map(|binding| binding.id.clone())
    }

    pub async fn set_container_id(
        &self,
        name: &str,
        parent: &str,
        id: &str,
    ) -> Result<(), StateError> {
        let mut document = self.document.lock().await;
        let mut next = document.clone();
        next.container = Some(ContainerBinding {
            name: name.to_string(),
            parent: parent.to_string(),
            id: id.to_string(),
        });
        write_document(&self.path, &next).await?;
        *document = next;
        Ok(())
    }
}

async fn read_document(path: &Path) -> StateDocument {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return StateDocument::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "sync state unreadable, starting fresh");
            return StateDocument::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(document) => document,
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "sync state is corrupt, starting fresh");
            StateDocument::default()
        }
    }
}

async fn write_document(path: &Path, document: &StateDocument) -> Result<(), StateError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let encoded = serde_json::to_vec_pretty(document)?;
    let partial = partial_path(path);
    tokio::fs::write(&partial, encoded).await?;
    tokio::fs::rename(&partial, path).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(local: &str, remote: &str) -> SyncRecord {
        SyncRecord {
            local_fingerprint: Some(local.to_string()),
            remote_fingerprint: Some(remote.to_string()),
            remote_modified_at: Some(1_700_000_000),
            last_sync_at: 1_700_000_100,
        }
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".chronicle/sync_state.json");

        let store = StateStore::open(&path).await;
        store
            .put_record("journal.html", record("a", "a"))
            .await
            .unwrap();
        store
            .set_container_id("campaign", "disk:/Chronicle", "disk:/Chronicle/campaign")
            .await
            .unwrap();

        let reopened = StateStore::open(&path).await;
        assert_eq!(
            reopened.record("journal.html").await,
            Some(record("a", "a"))
        );
        assert_eq!(
            reopened
                .container_id("campaign", "disk:/Chronicle")
                .await
                .as_deref(),
            Some("disk:/Chronicle/campaign")
        );
        assert_eq!(reopened.container_id("other", "disk:/Chronicle").await, None);
        assert!(!partial_path(&path).exists());
    }

    #[tokio::test]
    async fn missing_document_loads_empty() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().join("absent.json")).await;
        assert!(store.load().await.is_empty());
        assert_eq!(store.container_id("campaign", "disk:/").await, None);
    }

    #[tokio::test]
    async fn corrupt_document_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync_state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        let store = StateStore::open(&path).await;
        assert!(store.load().await.is_empty());

        store
            .put_record("settings.json", record("x", "y"))
            .await
            .unwrap();
        assert_eq!(store.load().await.len(), 1);
    }

    #[tokio::test]
    async fn tolerates_unknown_and_missing_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync_state.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "schema": 7,
                "records": {
                    "quest_log.html": {
                        "remote_fingerprint": "r1",
                        "etag": "ignored"
                    }
                }
            })
            .to_string(),
        )
        .unwrap();

        let store = StateStore::open(&path).await;
        let loaded = store.load().await;
        let entry = loaded.get("quest_log.html").unwrap();
        assert_eq!(entry.local_fingerprint, None);
        assert_eq!(entry.remote_fingerprint.as_deref(), Some("r1"));
        assert_eq!(entry.last_sync_at, 0);
    }

    #[tokio::test]
    async fn save_replaces_records_but_keeps_container() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sync_state.json");
        let store = StateStore::open(&path).await;
        store.set_container_id("c", "disk:/", "disk:/c").await.unwrap();
        store.put_record("a.html", record("1", "1")).await.unwrap();

        let mut replacement = HashMap::new();
        replacement.insert("b.html".to_string(), record("2", "2"));
        store.save(replacement).await.unwrap();

        let loaded = store.load().await;
        assert!(loaded.contains_key("b.html"));
        assert!(!loaded.contains_key("a.html"));
        assert_eq!(
            store.container_id("c", "disk:/").await.as_deref(),
            Some("disk:/c")
        );
    }
}
