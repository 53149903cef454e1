use dashmap::DashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::StorageError;

/// Storage key for the serialized item cache (`[[id, entry], ...]`).
pub const ITEM_CACHE_KEY: &str = "open_music.item_cache";
/// Storage key for the exclusion set (JSON array of video ids).
pub const BLACKLIST_KEY: &str = "open_music.video_blacklist";
/// Storage key for pinned item → video associations.
pub const PINS_KEY: &str = "open_music.pinned_videos";

/// Flat string key-value persistence.
///
/// Operations are synchronous and expected to be cheap; callers treat every
/// write failure as non-fatal.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory store, mainly for tests and non-persistent setups.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: DashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.data.get(key).map(|value| value.clone()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.data.remove(key);
        Ok(())
    }
}

/// One JSON file per key inside a data directory.
#[derive(Debug)]
pub struct JsonFileStore {
    data_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;

        info!("📁 Storage inicializado en: {}", data_dir.display());
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        // Las claves se usan como nombres de archivo
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
            && !key.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.data_dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.file_path(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.file_path(key)?;
        // Escribir a un temporal y renombrar para no dejar archivos a medias
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        debug!("💾 {} guardado ({} bytes)", key, value.len());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let path = self.file_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").unwrap(), None);

        store.set("k", "[1,2]").unwrap();
        assert_eq!(store.get("k").unwrap().as_deref(), Some("[1,2]"));

        store.remove("k").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_json_file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = JsonFileStore::new(dir.path()).unwrap();
        store.set(BLACKLIST_KEY, r#"["abc"]"#).unwrap();
        assert!(dir.path().join("open_music.video_blacklist.json").exists());

        let reopened = JsonFileStore::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get(BLACKLIST_KEY).unwrap().as_deref(),
            Some(r#"["abc"]"#)
        );

        reopened.remove(BLACKLIST_KEY).unwrap();
        reopened.remove(BLACKLIST_KEY).unwrap();
        assert_eq!(reopened.get(BLACKLIST_KEY).unwrap(), None);
    }

    #[test]
    fn test_json_file_store_rejects_path_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path()).unwrap();

        assert!(matches!(
            store.set("../escape", "x"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(matches!(store.get(""), Err(StorageError::InvalidKey(_))));
    }
}
