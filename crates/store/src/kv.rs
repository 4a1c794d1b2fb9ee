use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::{StoreError, write_atomic};

/// Key holding the last tempo as a decimal string.
pub const LAST_TEMPO_KEY: &str = "lastTempo";
/// Key holding the JSON-encoded metronome settings.
pub const SETTINGS_KEY: &str = "app-settings";

/// Small string key/value file, rewritten in full on every change.
#[derive(Debug)]
pub struct PreferenceStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl PreferenceStore {
    /// Load `path`; a missing or unreadable file starts empty.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                log::warn!("ignoring corrupt preferences at {path:?}: {e}");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                log::warn!("could not read preferences at {path:?}: {e}");
                BTreeMap::new()
            }
        };

        Self { path, values }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Store `value` under `key`. Nothing changes in memory unless the file
    /// was written.
    pub async fn set(&mut self, key: &str, value: impl Into<String>) -> Result<(), StoreError> {
        let mut values = self.values.clone();
        values.insert(key.to_owned(), value.into());
        self.save(&values).await?;
        self.values = values;
        Ok(())
    }

    /// Parse a JSON value stored under `key`. Malformed values read as absent.
    pub fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key)?;
        match serde_json::from_str(raw) {
            Ok(value) => Some(value),
            Err(e) => {
                log::warn!("ignoring malformed preference '{key}': {e}");
                None
            }
        }
    }

    pub async fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(value)?;
        self.set(key, raw).await
    }

    async fn save(&self, values: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(values)?;
        write_atomic(&self.path, &json).await
    }
}
