//! Cross-platform key/value persistence.
//!
//! - Web: `localStorage`
//! - Desktop: one file per key in the platform-appropriate config directory:
//!   - Linux: `~/.config/quickpoll/`
//!   - macOS: `~/Library/Application Support/quickpoll/`
//!   - Windows: `%APPDATA%\quickpoll\`
//!
//! Writes are best effort: a failing store degrades to "nothing persisted",
//! it never surfaces an error to callers.

use std::collections::HashMap;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};

/// String key/value store surviving reloads.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;

    /// Returns `true` if the value was persisted.
    fn set(&self, key: &str, value: &str) -> bool;

    fn remove(&self, key: &str);

    fn exists(&self, key: &str) -> bool {
        self.get(key).is_some()
    }
}

/// Save a JSON-encoded value.
pub fn save<T: Serialize>(store: &dyn KeyValueStore, key: &str, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => store.set(key, &json),
        Err(_) => false,
    }
}

/// Load a JSON-encoded value. `None` if missing or undecodable.
pub fn load<T: DeserializeOwned>(store: &dyn KeyValueStore, key: &str) -> Option<T> {
    let json = store.get(key)?;
    serde_json::from_str(&json).ok()
}

/// The platform's persistent store.
#[derive(Debug, Clone, Default)]
pub struct PlatformStorage {
    #[cfg(not(target_arch = "wasm32"))]
    dir: Option<std::path::PathBuf>,
}

impl PlatformStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep files under `dir` instead of the config directory.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn in_dir(dir: impl Into<std::path::PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }
}

impl KeyValueStore for PlatformStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.load_raw(key)
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.save_raw(key, value)
    }

    fn remove(&self, key: &str) {
        self.remove_raw(key)
    }
}

// =========================================
// Web (WASM) implementation
// =========================================

#[cfg(target_arch = "wasm32")]
impl PlatformStorage {
    fn local_storage() -> Option<web_sys::Storage> {
        web_sys::window()?.local_storage().ok()?
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        Self::local_storage()
            .map(|storage| storage.set_item(key, value).is_ok())
            .unwrap_or(false)
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        Self::local_storage()?.get_item(key).ok()?
    }

    fn remove_raw(&self, key: &str) {
        if let Some(storage) = Self::local_storage() {
            let _ = storage.remove_item(key);
        }
    }
}

// =========================================
// Desktop (native) implementation
// =========================================

#[cfg(not(target_arch = "wasm32"))]
impl PlatformStorage {
    fn storage_dir(&self) -> Option<std::path::PathBuf> {
        let app_dir = match &self.dir {
            Some(dir) => dir.clone(),
            None => dirs::config_dir()?.join("quickpoll"),
        };

        if !app_dir.exists() {
            std::fs::create_dir_all(&app_dir).ok()?;
        }

        Some(app_dir)
    }

    fn file_path(&self, key: &str) -> Option<std::path::PathBuf> {
        let dir = self.storage_dir()?;
        // Sanitize key to be a valid filename
        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Some(dir.join(format!("{safe_key}.json")))
    }

    fn save_raw(&self, key: &str, value: &str) -> bool {
        let Some(path) = self.file_path(key) else {
            return false;
        };
        match std::fs::write(&path, value) {
            Ok(()) => true,
            Err(e) => {
                crate::log_warn!("Failed to persist {}: {}", path.display(), e);
                false
            }
        }
    }

    fn load_raw(&self, key: &str) -> Option<String> {
        let path = self.file_path(key)?;
        std::fs::read_to_string(path).ok()
    }

    fn remove_raw(&self, key: &str) {
        if let Some(path) = self.file_path(key) {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// In-memory store, used by tests and by hosts without persistence.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl KeyValueStore for MemoryStorage {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) -> bool {
        self.entries.lock().insert(key.to_string(), value.to_string());
        true
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Entry {
        visitor_id: String,
        timestamp: i64,
    }

    #[test]
    fn json_helpers_round_trip_through_memory() {
        let store = MemoryStorage::new();
        let entry = Entry {
            visitor_id: "abc".into(),
            timestamp: 42,
        };
        assert!(save(&store, "cache", &entry));
        assert_eq!(load::<Entry>(&store, "cache"), Some(entry));

        store.set("cache", "{not json");
        assert_eq!(load::<Entry>(&store, "cache"), None);

        store.remove("cache");
        assert!(!store.exists("cache"));
    }

    #[cfg(not(target_arch = "wasm32"))]
    #[test]
    fn platform_storage_writes_one_file_per_key() {
        let dir = std::env::temp_dir().join(format!("quickpoll-storage-{}", uuid::Uuid::new_v4()));
        let store = PlatformStorage::in_dir(&dir);

        assert!(store.set("poll_session_id", "abc"));
        assert!(dir.join("poll_session_id.json").exists());
        assert_eq!(store.get("poll_session_id").as_deref(), Some("abc"));

        store.remove("poll_session_id");
        assert_eq!(store.get("poll_session_id"), None);

        let _ = std::fs::remove_dir_all(dir);
    }
}
