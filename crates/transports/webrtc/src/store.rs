//! Persistence of the local mute / camera-off intent
//!
//! The intent survives a reload of the same room under the key
//! `webrtc_media_state_<roomId>_<userId>` as JSON `{isMuted, isVideoOff}`.

use crate::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

/// Key/value store for small UI state
pub trait MediaStateStore: Send + Sync {
    /// Read a value
    fn load(&self, key: &str) -> Result<Option<String>>;
    /// Write a value
    fn save(&self, key: &str, value: &str) -> Result<()>;
    /// Delete a value; missing keys are not an error
    fn remove(&self, key: &str) -> Result<()>;
}

/// Persisted toggle state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaToggleState {
    /// Microphone muted
    #[serde(default)]
    pub is_muted: bool,
    /// Camera off
    #[serde(default)]
    pub is_video_off: bool,
}

/// Storage key for a room/user pair
pub fn media_state_key(room_id: &str, user_id: &str) -> String {
    format!("webrtc_media_state_{}_{}", room_id, user_id)
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStateStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaStateStore for MemoryStateStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// Store keeping one `<key>.json` file per entry in a directory
#[derive(Debug, Clone)]
pub struct FileStateStore {
    dir: PathBuf,
}

impl FileStateStore {
    /// Use `dir`, creating it if needed
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory holding the entries
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.json", file_name))
    }
}

impl MediaStateStore for FileStateStore {
    fn load(&self, key: &str) -> Result<Option<String>> {
        match std::fs::read_to_string(self.path_for(key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::StoreError(format!("Failed to read {}: {}", key, e))),
        }
    }

    fn save(&self, key: &str, value: &str) -> Result<()> {
        std::fs::write(self.path_for(key), value)
            .map_err(|e| Error::StoreError(format!("Failed to write {}: {}", key, e)))
    }

    fn remove(&self, key: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StoreError(format!("Failed to remove {}: {}", key, e))),
        }
    }
}

/// Toggle state of one room/user pair bound to a store.
///
/// Store failures are logged and never propagate: persistence is a
/// convenience and must not break the call.
#[derive(Clone)]
pub struct MediaStatePersistence {
    store: Arc<dyn MediaStateStore>,
    key: String,
}

impl MediaStatePersistence {
    /// Bind `store` to the key of `room_id`/`user_id`
    pub fn new(store: Arc<dyn MediaStateStore>, room_id: &str, user_id: &str) -> Self {
        Self {
            store,
            key: media_state_key(room_id, user_id),
        }
    }

    /// Storage key in use
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Saved state, or the default when missing or unreadable
    pub fn read(&self) -> MediaToggleState {
        match self.store.load(&self.key) {
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(key = %self.key, "Ignoring unreadable media state: {}", e);
                MediaToggleState::default()
            }),
            Ok(None) => MediaToggleState::default(),
            Err(e) => {
                warn!(key = %self.key, "Failed to load media state: {}", e);
                MediaToggleState::default()
            }
        }
    }

    /// Save `state`
    pub fn write(&self, state: MediaToggleState) {
        let result = serde_json::to_string(&state)
            .map_err(Error::from)
            .and_then(|raw| self.store.save(&self.key, &raw));
        if let Err(e) = result {
            warn!(key = %self.key, "Failed to save media state: {}", e);
        }
    }

    /// Forget the saved state
    pub fn clear(&self) {
        if let Err(e) = self.store.remove(&self.key) {
            warn!(key = %self.key, "Failed to remove media state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_state_key() {
        assert_eq!(
            media_state_key("room-1", "user-9"),
            "webrtc_media_state_room-1_user-9"
        );
    }

    #[test]
    fn test_toggle_state_json_shape() {
        let state = MediaToggleState {
            is_muted: true,
            is_video_off: false,
        };
        assert_eq!(
            serde_json::to_string(&state).unwrap(),
            r#"{"isMuted":true,"isVideoOff":false}"#
        );
    }

    #[test]
    fn test_persistence_roundtrip_memory() {
        let store = Arc::new(MemoryStateStore::new());
        let persistence = MediaStatePersistence::new(store.clone(), "room-1", "user-1");

        assert_eq!(persistence.read(), MediaToggleState::default());

        let state = MediaToggleState {
            is_muted: true,
            is_video_off: true,
        };
        persistence.write(state);
        assert_eq!(persistence.read(), state);

        persistence.clear();
        assert!(store.load(persistence.key()).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_state_falls_back_to_default() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .save(&media_state_key("room-1", "user-1"), "{not json")
            .unwrap();
        let persistence = MediaStatePersistence::new(store, "room-1", "user-1");
        assert_eq!(persistence.read(), MediaToggleState::default());
    }

    #[test]
    fn test_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path().join("state")).unwrap();

        assert!(store.load("webrtc_media_state_r_u").unwrap().is_none());
        store.save("webrtc_media_state_r_u", r#"{"isMuted":true}"#).unwrap();
        assert_eq!(
            store.load("webrtc_media_state_r_u").unwrap().as_deref(),
            Some(r#"{"isMuted":true}"#)
        );

        store.remove("webrtc_media_state_r_u").unwrap();
        store.remove("webrtc_media_state_r_u").unwrap();
        assert!(store.load("webrtc_media_state_r_u").unwrap().is_none());
    }

    #[test]
    fn test_file_store_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStateStore::new(dir.path()).unwrap();
        store.save("../escape/key", "{}").unwrap();
        assert!(dir.path().join("___escape_key.json").exists());
    }
}
