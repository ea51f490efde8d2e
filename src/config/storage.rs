//! Persistent preference storage
//!
//! A flat key-value store in JSON format. Values are primitives (strings,
//! booleans, integers); encrypted blobs are stored as strings.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ConfigError, CredentialError, Result};

use super::Config;

/// Key-value preference store backed by a JSON file
///
/// Every write is persisted immediately (temp file + rename) so a crash never
/// leaves a half-written file behind.
#[derive(Debug)]
pub struct PreferenceStore {
    /// Current values
    values: RwLock<Map<String, Value>>,
    /// Path to save to; `None` keeps everything in memory
    path: Option<PathBuf>,
}

impl PreferenceStore {
    /// Store that never touches disk
    pub fn in_memory() -> Self {
        Self {
            values: RwLock::new(Map::new()),
            path: None,
        }
    }

    /// Load preferences from the default location
    pub fn load(config: &Config) -> Result<Self> {
        let path = config.preferences_path()?;
        Self::load_from(&path)
    }

    /// Load preferences from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let values = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ConfigError::LoadFailed(format!("Failed to read preferences file: {}", e))
            })?;
            match serde_json::from_str::<Value>(&content) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(ConfigError::LoadFailed(
                        "Preferences file is not a JSON object".to_string(),
                    )
                    .into());
                }
                Err(e) => {
                    return Err(ConfigError::LoadFailed(format!(
                        "Failed to parse preferences file: {}",
                        e
                    ))
                    .into());
                }
            }
        } else {
            Map::new()
        };

        debug!("Loaded {} preference(s) from {:?}", values.len(), path);

        Ok(Self {
            values: RwLock::new(values),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn set_string(&self, key: &str, value: impl Into<String>) -> Result<()> {
        self.set(key, Value::String(value.into()))
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set(key, Value::Bool(value))
    }

    pub fn set_i64(&self, key: &str, value: i64) -> Result<()> {
        self.set(key, Value::from(value))
    }

    /// Remove a key; removing a missing key is not an error
    pub fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.write_guard()?;
        if values.remove(key).is_none() {
            return Ok(());
        }
        self.persist(&values)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().ok()?.get(key).cloned()
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut values = self.write_guard()?;
        values.insert(key.to_string(), value);
        self.persist(&values)
    }

    fn write_guard(&self) -> Result<std::sync::RwLockWriteGuard<'_, Map<String, Value>>> {
        self.values
            .write()
            .map_err(|_| CredentialError::Storage("preference store lock poisoned".to_string()).into())
    }

    fn persist(&self, values: &Map<String, Value>) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CredentialError::Storage(format!("Failed to create preferences directory: {}", e))
            })?;
        }

        let content = serde_json::to_string_pretty(values)
            .map_err(|e| CredentialError::Storage(format!("Failed to serialize: {}", e)))?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .map_err(|e| CredentialError::Storage(format!("Failed to write: {}", e)))?;
        std::fs::rename(&tmp, path)
            .map_err(|e| CredentialError::Storage(format!("Failed to replace: {}", e)))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_in_memory_roundtrip() {
        let store = PreferenceStore::in_memory();
        store.set_string("git.user.name", "Ada").unwrap();
        store.set_bool("settings.auto_fetch", true).unwrap();
        store.set_i64("settings.fetch_interval_minutes", 30).unwrap();

        assert_eq!(store.get_string("git.user.name").as_deref(), Some("Ada"));
        assert_eq!(store.get_bool("settings.auto_fetch"), Some(true));
        assert_eq!(store.get_i64("settings.fetch_interval_minutes"), Some(30));
        assert_eq!(store.get_bool("git.user.name"), None);
    }

    #[test]
    fn test_remove_missing_key() {
        let store = PreferenceStore::in_memory();
        assert!(store.remove("nope").is_ok());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("preferences.json");

        let store = PreferenceStore::load_from(&path).unwrap();
        store.set_string("credentials.default", "sealed").unwrap();
        store.set_bool("settings.pull_rebase", true).unwrap();
        store.remove("credentials.default").unwrap();

        let loaded = PreferenceStore::load_from(&path).unwrap();
        assert!(!loaded.contains("credentials.default"));
        assert_eq!(loaded.get_bool("settings.pull_rebase"), Some(true));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_rejects_non_object_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        assert!(PreferenceStore::load_from(&path).is_err());
    }
}
