//! Key/value persistence for the fleet store.
//!
//! Every piece of durable state is a JSON blob under a fixed key. Backends
//! only move opaque strings; decoding and validation happen in the store so
//! a corrupt blob can be discarded without touching the others.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{FleetError, Result};

/// Persisted keys.
pub mod keys {
    pub const DEVICES: &str = "devices";
    pub const ROLLOUTS: &str = "rollouts";
    pub const ACTIVE_ROLLOUT: &str = "activeRollout";
    pub const WIZARD_DATA: &str = "updateWizardData";
    pub const WIZARD_STEP: &str = "updateWizardStep";
    pub const PLAYED_INTROS: &str = "animatedRolloutIds";
    pub const SESSION: &str = "mdm_session";

    /// Keys owned by the fleet store (the session belongs to the auth gate).
    pub const STORE: [&str; 6] = [
        DEVICES,
        ROLLOUTS,
        ACTIVE_ROLLOUT,
        WIZARD_DATA,
        WIZARD_STEP,
        PLAYED_INTROS,
    ];
}

/// Storage for persisted blobs.
pub trait StateBackend: Send + Sync {
    /// Read a blob; `Ok(None)` when the key was never written.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write (replace) a blob.
    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Remove a blob. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Short name for logs.
    fn describe(&self) -> String;
}

/// Decode the blob under `key`.
pub fn load_json<T: DeserializeOwned>(backend: &dyn StateBackend, key: &str) -> Result<Option<T>> {
    match backend.get(key)? {
        None => Ok(None),
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| FleetError::CorruptSnapshot {
                key: key.to_string(),
                source,
            }),
    }
}

/// Encode `value` and store it under `key`.
pub fn save_json<T: Serialize + ?Sized>(backend: &dyn StateBackend, key: &str, value: &T) -> Result<()> {
    let json = serde_json::to_string(value).map_err(|source| FleetError::Encode {
        key: key.to_string(),
        source,
    })?;
    backend.put(key, &json)
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Backend that keeps blobs in memory. Used with `--no-persist` and in tests.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    blobs: RwLock<HashMap<String, String>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(key: &str) -> FleetError {
        FleetError::Storage {
            key: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::Other, "lock poisoned"),
        }
    }
}

impl StateBackend for MemoryBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned(key))?;
        Ok(blobs.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned(key))?;
        blobs.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned(key))?;
        blobs.remove(key);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

// =============================================================================
// File backend
// =============================================================================

/// Backend that stores each key as `<dir>/<key>.json`.
#[derive(Debug, Clone)]
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    /// Create the backend, creating `dir` if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|source| FleetError::Storage {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }

    fn storage_error(key: &str) -> impl FnOnce(std::io::Error) -> FleetError + '_ {
        move |source| FleetError::Storage {
            key: key.to_string(),
            source,
        }
    }
}

impl StateBackend for FileBackend {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }
        std::fs::read_to_string(&path)
            .map(Some)
            .map_err(Self::storage_error(key))
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key);
        // Write then rename so a crash never leaves a half-written blob
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, value).map_err(Self::storage_error(key))?;
        std::fs::rename(&tmp, &path).map_err(Self::storage_error(key))?;
        debug!(path = %path.display(), bytes = value.len(), "State blob written");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::storage_error(key)(e)),
        }
    }

    fn describe(&self) -> String {
        format!("file:{}", self.dir.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_round_trip() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get(keys::DEVICES).unwrap(), None);

        save_json(&backend, keys::WIZARD_STEP, &2usize).unwrap();
        assert_eq!(load_json::<usize>(&backend, keys::WIZARD_STEP).unwrap(), Some(2));

        backend.remove(keys::WIZARD_STEP).unwrap();
        backend.remove(keys::WIZARD_STEP).unwrap();
        assert_eq!(backend.get(keys::WIZARD_STEP).unwrap(), None);
    }

    #[test]
    fn test_file_backend_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path().join("state")).unwrap();
        save_json(&backend, keys::PLAYED_INTROS, &vec![1, 2, 3]).unwrap();

        let reopened = FileBackend::new(dir.path().join("state")).unwrap();
        let ids: Option<Vec<i64>> = load_json(&reopened, keys::PLAYED_INTROS).unwrap();
        assert_eq!(ids, Some(vec![1, 2, 3]));
        assert!(reopened.dir().join("animatedRolloutIds.json").exists());
    }

    #[test]
    fn test_corrupt_blob_is_reported() {
        let backend = MemoryBackend::new();
        backend.put(keys::DEVICES, "[{\"id\": \"DEV-0001\"").unwrap();
        let err = load_json::<Vec<serde_json::Value>>(&backend, keys::DEVICES).unwrap_err();
        assert!(matches!(err, FleetError::CorruptSnapshot { ref key, .. } if key == "devices"));
    }
}
