use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Settings;
use crate::error::StorageError;
use crate::models::{Channel, Video};

/// Channel id → cached video list, most recent first.
pub type CacheMap = HashMap<String, Vec<Video>>;

/// The whole snapshot that survives across sessions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersistedState {
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub settings: Option<Settings>,
    #[serde(default)]
    pub cache: CacheMap,
}

/// Key-value style snapshot persistence. Each save replaces one section of
/// the snapshot, last write wins; there is no partial write within a section.
#[allow(async_fn_in_trait)]
pub trait Storage {
    async fn load(&self) -> Result<Option<PersistedState>, StorageError>;
    async fn save_channels(&self, channels: &[Channel]) -> Result<(), StorageError>;
    async fn save_settings(&self, settings: &Settings) -> Result<(), StorageError>;
    async fn save_cache(&self, cache: &CacheMap) -> Result<(), StorageError>;
}

/// Snapshot persistence backed by a single pretty-printed JSON file.
/// Writes go through a temp file and a rename, so a crash mid-save leaves
/// the previous snapshot intact.
pub struct JsonFileStorage {
    path: PathBuf,
    /// All saves share one temp path and read-patch-write the whole file;
    /// writers must take turns or they clobber each other's temp file and
    /// re-persist stale snapshots.
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn read_state(&self) -> Result<Option<PersistedState>, StorageError> {
        match tokio::fs::read(&self.path).await {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_state(&self, state: &PersistedState) -> Result<(), StorageError> {
        let raw = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), bytes = raw.len(), "snapshot written");
        Ok(())
    }

    /// Read-patch-write: load the current snapshot, replace one section,
    /// write the whole file back. The whole cycle holds the write lock so a
    /// concurrent save cannot interleave between the read and the rename.
    async fn patch(
        &self,
        apply: impl FnOnce(&mut PersistedState),
    ) -> Result<(), StorageError> {
        let _writing = self.write_lock.lock().await;
        let mut state = self.read_state().await?.unwrap_or_default();
        apply(&mut state);
        self.write_state(&state).await
    }
}

impl Storage for JsonFileStorage {
    async fn load(&self) -> Result<Option<PersistedState>, StorageError> {
        self.read_state().await
    }

    async fn save_channels(&self, channels: &[Channel]) -> Result<(), StorageError> {
        let channels = channels.to_vec();
        self.patch(move |state| state.channels = channels).await
    }

    async fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
        let settings = settings.clone();
        self.patch(move |state| state.settings = Some(settings)).await
    }

    async fn save_cache(&self, cache: &CacheMap) -> Result<(), StorageError> {
        let cache = cache.clone();
        self.patch(move |state| state.cache = cache).await
    }
}

/// In-memory storage double used by the store and engine tests.
#[cfg(test)]
pub(crate) mod memory {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    pub struct MemoryStorage {
        pub state: Mutex<PersistedState>,
        pub cache_saves: AtomicUsize,
    }

    impl Storage for MemoryStorage {
        async fn load(&self) -> Result<Option<PersistedState>, StorageError> {
            Ok(Some(self.state.lock().expect("state lock").clone()))
        }

        async fn save_channels(&self, channels: &[Channel]) -> Result<(), StorageError> {
            self.state.lock().expect("state lock").channels = channels.to_vec();
            Ok(())
        }

        async fn save_settings(&self, settings: &Settings) -> Result<(), StorageError> {
            self.state.lock().expect("state lock").settings = Some(settings.clone());
            Ok(())
        }

        async fn save_cache(&self, cache: &CacheMap) -> Result<(), StorageError> {
            self.cache_saves.fetch_add(1, Ordering::SeqCst);
            self.state.lock().expect("state lock").cache = cache.clone();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{test_channel, test_video};
    use chrono::Utc;

    fn storage_in(dir: &Path) -> JsonFileStorage {
        JsonFileStorage::new(dir.join("state.json")).unwrap()
    }

    #[tokio::test]
    async fn load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());

        let channels = vec![test_channel("UC1", "one")];
        let mut cache = CacheMap::new();
        cache.insert("UC1".to_string(), vec![test_video("v1", "UC1", Utc::now())]);

        storage.save_channels(&channels).await.unwrap();
        storage.save_cache(&cache).await.unwrap();

        let state = storage.load().await.unwrap().unwrap();
        assert_eq!(state.channels, channels);
        assert_eq!(state.cache["UC1"].len(), 1);
        assert!(state.settings.is_none());
    }

    #[tokio::test]
    async fn partial_save_keeps_other_sections() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());

        storage.save_channels(&[test_channel("UC1", "one")]).await.unwrap();
        storage.save_settings(&Settings::default()).await.unwrap();

        // Overwriting the cache section must not clobber channels/settings.
        storage.save_cache(&CacheMap::new()).await.unwrap();

        let state = storage.load().await.unwrap().unwrap();
        assert_eq!(state.channels.len(), 1);
        assert!(state.settings.is_some());
    }

    #[tokio::test]
    async fn concurrent_saves_take_turns() {
        let dir = tempfile::tempdir().unwrap();
        let storage = storage_in(dir.path());
        storage.save_channels(&[test_channel("UC1", "one")]).await.unwrap();

        // A multi-channel cold aggregate persists the cache once per channel,
        // concurrently. Every save must land; none may trip over another
        // writer's temp file or resurrect a stale snapshot.
        let storage = &storage;
        let saves = (0..64).map(|i| async move {
            let mut cache = CacheMap::new();
            cache.insert(format!("UC{i}"), vec![test_video("v", &format!("UC{i}"), Utc::now())]);
            storage.save_cache(&cache).await
        });
        let results = futures::future::join_all(saves).await;
        assert!(results.iter().all(|r| r.is_ok()));

        let state = storage.load().await.unwrap().unwrap();
        // Whole-section replacement: exactly one writer's cache survives,
        // and the channels section is untouched by the barrage.
        assert_eq!(state.cache.len(), 1);
        assert_eq!(state.channels.len(), 1);
    }

    #[tokio::test]
    async fn creates_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b/state.json");
        let storage = JsonFileStorage::new(&nested).unwrap();
        storage.save_cache(&CacheMap::new()).await.unwrap();
        assert!(nested.exists());
    }
}
