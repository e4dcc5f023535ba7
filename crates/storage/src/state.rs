//! Durable, schema-versioned persistence of the agent's continuation state.
//!
//! The payload is opaque to this module. It is wrapped in an envelope
//! carrying the schema version and write time, and replaced atomically on
//! every save: the new content is written to a uniquely named sibling temp
//! file, synced, then renamed over the canonical path, and the directory is
//! synced after the rename. A reader therefore sees either the previous
//! record or the new one, never a truncated mix.
//!
//! Both operations are best-effort. Failures are logged and reported as
//! `false` / `None` so a session can always continue with fresh state.

use chromepilot_core::{Error, Paths, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

/// On-disk layout version written by this build.
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordOut<'a, T: Serialize> {
    schema_version: u32,
    timestamp: String,
    state: &'a T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordIn {
    schema_version: Value,
    #[serde(default)]
    #[allow(dead_code)]
    timestamp: Option<String>,
    state: Value,
}

pub struct StateStore {
    path: PathBuf,
    schema_version: u32,
}

impl StateStore {
    pub fn new(path: PathBuf) -> Self {
        Self::with_schema_version(path, SCHEMA_VERSION)
    }

    pub fn with_schema_version(path: PathBuf, schema_version: u32) -> Self {
        Self { path, schema_version }
    }

    /// The default single slot under the data directory.
    pub fn default_slot(paths: &Paths) -> Self {
        Self::new(paths.state_file())
    }

    /// A store keyed by session, isolated from every other key.
    pub fn for_session(paths: &Paths, session_key: &str) -> Self {
        Self::new(paths.session_state_file(session_key))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// A sibling temp file unique to one save, so concurrent writers of the
    /// same slot never share it.
    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state.json".into());
        name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        self.path.with_file_name(name)
    }

    /// Persist `state`, returning whether the write landed.
    pub async fn save<T: Serialize>(&self, state: &T) -> bool {
        let tmp = self.tmp_path();
        match self.try_save(state, &tmp).await {
            Ok(()) => {
                debug!(path = %self.path.display(), "State saved");
                true
            }
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to save state");
                let _ = tokio::fs::remove_file(&tmp).await;
                false
            }
        }
    }

    async fn try_save<T: Serialize>(&self, state: &T, tmp: &Path) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let record = RecordOut {
            schema_version: self.schema_version,
            timestamp: chrono::Utc::now().to_rfc3339(),
            state,
        };
        let body = serde_json::to_vec_pretty(&record)?;

        {
            let mut file = tokio::fs::File::create(tmp).await?;
            file.write_all(&body).await?;
            file.flush().await?;
            file.sync_all().await?;
        }

        tokio::fs::rename(tmp, &self.path)
            .await
            .map_err(|e| Error::Storage(format!("atomic rename onto {} failed: {}", self.path.display(), e)))?;

        self.sync_parent().await;
        Ok(())
    }

    /// Best-effort fsync of the containing directory so the rename itself
    /// survives a crash.
    #[cfg(unix)]
    async fn sync_parent(&self) {
        let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) else {
            return;
        };
        match tokio::fs::File::open(parent).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!(dir = %parent.display(), error = %e, "Directory fsync failed");
                }
            }
            Err(e) => debug!(dir = %parent.display(), error = %e, "Cannot open directory for fsync"),
        }
    }

    #[cfg(not(unix))]
    async fn sync_parent(&self) {}

    /// Restore the last saved state. Missing, stale-version or unreadable
    /// files all yield `None`.
    pub async fn load<T: DeserializeOwned>(&self) -> Option<T> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No prior state file");
                return None;
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read state file");
                return None;
            }
        };

        let record: RecordIn = match serde_json::from_slice(&raw) {
            Ok(r) => r,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State file is not a valid record, ignoring");
                return None;
            }
        };

        if record.schema_version.as_u64() != Some(u64::from(self.schema_version)) {
            warn!(
                path = %self.path.display(),
                found = %record.schema_version,
                expected = self.schema_version,
                "State file schema version mismatch, ignoring"
            );
            return None;
        }

        match serde_json::from_value(record.state) {
            Ok(state) => {
                info!(path = %self.path.display(), "Restored prior state");
                Some(state)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "State payload does not match the expected shape, ignoring");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> StateStore {
        StateStore::new(dir.path().join("storage").join("state.json"))
    }

    fn leftover_tmp_files(store: &StateStore) -> Vec<PathBuf> {
        std::fs::read_dir(store.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "tmp"))
            .collect()
    }

    #[tokio::test]
    async fn test_round_trip_strips_envelope() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        let payload = json!({"messages": [{"role": "user", "content": "hi"}], "n": 3});

        assert!(store.save(&payload).await);
        let loaded: Value = store.load().await.unwrap();
        assert_eq!(loaded, payload);
    }

    #[tokio::test]
    async fn test_record_layout_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.save(&json!(["a", "b"])).await);

        let raw = std::fs::read_to_string(store.path()).unwrap();
        let v: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(v["schemaVersion"], 1);
        assert_eq!(v["state"], json!(["a", "b"]));
        let ts = v["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(ts).is_ok());
        assert!(leftover_tmp_files(&store).is_empty(), "temp file must be renamed away");
    }

    #[tokio::test]
    async fn test_missing_file_is_no_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.load::<Value>().await.is_none());
    }

    #[tokio::test]
    async fn test_version_gate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");
        let v1 = StateStore::with_schema_version(path.clone(), 1);
        assert!(v1.save(&json!({"k": "v"})).await);

        assert_eq!(v1.load::<Value>().await, Some(json!({"k": "v"})));
        let v2 = StateStore::with_schema_version(path, 2);
        assert!(v2.load::<Value>().await.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_no_state() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        std::fs::create_dir_all(store.path().parent().unwrap()).unwrap();

        std::fs::write(store.path(), "{\"schemaVersion\": 1, \"state\": ").unwrap();
        assert!(store.load::<Value>().await.is_none());

        std::fs::write(store.path(), "not json at all").unwrap();
        assert!(store.load::<Value>().await.is_none());

        std::fs::write(store.path(), r#"{"schemaVersion": "1", "state": {}}"#).unwrap();
        assert!(store.load::<Value>().await.is_none());
    }

    #[tokio::test]
    async fn test_payload_shape_mismatch_is_no_state() {
        #[derive(Debug, Deserialize)]
        struct Typed {
            #[allow(dead_code)]
            messages: Vec<String>,
        }
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.save(&json!({"messages": 5})).await);
        assert!(store.load::<Typed>().await.is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_whole_record() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        assert!(store.save(&json!({"turn": 1, "extra": true})).await);
        assert!(store.save(&json!({"turn": 2})).await);
        assert_eq!(store.load::<Value>().await, Some(json!({"turn": 2})));
    }

    #[tokio::test]
    async fn test_save_failure_reports_false() {
        let dir = TempDir::new().unwrap();
        // A regular file where the parent directory should be.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "x").unwrap();
        let store = StateStore::new(blocker.join("state.json"));
        assert!(!store.save(&json!({"a": 1})).await);
    }

    #[tokio::test]
    async fn test_session_keys_are_isolated() {
        let dir = TempDir::new().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let a = StateStore::for_session(&paths, "cli:a");
        let b = StateStore::for_session(&paths, "cli:b");
        assert!(a.save(&json!("alpha")).await);
        assert!(b.load::<Value>().await.is_none());
        assert_eq!(a.load::<String>().await.as_deref(), Some("alpha"));
    }

    #[test]
    fn test_temp_names_are_unique_siblings() {
        let store = StateStore::new(PathBuf::from("/data/state.json"));
        let (a, b) = (store.tmp_path(), store.tmp_path());
        assert_ne!(a, b);
        assert_eq!(a.parent(), store.path().parent());
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("state.json."));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_of_one_slot_all_land() {
        let dir = TempDir::new().unwrap();
        // Two stores on one path, as when the CLI and the web server share a slot.
        let a = std::sync::Arc::new(store_in(&dir));
        let b = std::sync::Arc::new(store_in(&dir));

        let handles: Vec<_> = (0..16u64)
            .map(|i| {
                let store = if i % 2 == 0 { a.clone() } else { b.clone() };
                tokio::spawn(async move { store.save(&json!({"writer": i})).await })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap());
        }

        let loaded: Value = a.load().await.unwrap();
        assert!(loaded["writer"].as_u64().unwrap() < 16);
        assert!(leftover_tmp_files(&a).is_empty());
    }
}
