//! Saved game configs: named JSON files in one shared directory, independent
//! of any game.

use crate::error::StorageError;
use crate::store::atomic::write_json_atomic;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::info;

/// Listing entry for one saved config.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SavedConfig {
    pub filename: String,
    pub size: u64,
    /// Local time, `%Y-%m-%d %H:%M:%S`.
    pub modified: String,
}

#[derive(Debug, Clone)]
pub struct ConfigLibrary {
    dir: PathBuf,
}

/// Spaces become `_`; anything but ASCII letters, digits and `_` is dropped.
fn file_stem(name: &str) -> String {
    name.trim()
        .replace(' ', "_")
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

impl ConfigLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `config` as `<sanitized name>.json`, replacing any file of that
    /// name. Returns the file name.
    pub fn save(&self, name: &str, config: &Value) -> Result<String, StorageError> {
        let is_empty = match config {
            Value::Object(map) => map.is_empty(),
            _ => true,
        };
        if is_empty {
            return Err(StorageError::InvalidPath(
                "A saved config must be a non-empty JSON object".to_string(),
            ));
        }
        let stem = file_stem(name);
        if stem.is_empty() {
            return Err(StorageError::InvalidPath(format!("Invalid config name '{}'", name)));
        }
        let filename = format!("{}.json", stem);
        write_json_atomic(&self.dir.join(&filename), config)?;
        info!(file = %filename, dir = %self.dir.display(), "Config saved");
        Ok(filename)
    }

    /// Saved configs, newest first. A missing directory lists as empty.
    pub fn list(&self) -> Result<Vec<SavedConfig>, StorageError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut found: Vec<(SystemTime, SavedConfig)> = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let meta = fs::metadata(&path)?;
            let modified = meta.modified()?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            found.push((
                modified,
                SavedConfig {
                    filename,
                    size: meta.len(),
                    modified: DateTime::<Local>::from(modified)
                        .format("%Y-%m-%d %H:%M:%S")
                        .to_string(),
                },
            ));
        }
        found.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.filename.cmp(&b.1.filename)));
        Ok(found.into_iter().map(|(_, saved)| saved).collect())
    }

    /// Load a saved config by file name; `.json` is added when missing and
    /// any directory part is ignored.
    pub fn load(&self, name: &str) -> Result<(String, Value), StorageError> {
        let base = Path::new(name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| StorageError::InvalidPath(format!("Invalid config name '{}'", name)))?;
        let filename = if base.ends_with(".json") {
            base
        } else {
            format!("{}.json", base)
        };
        let path = self.dir.join(&filename);
        if !path.is_file() {
            return Err(StorageError::NotFound(path));
        }
        let config = serde_json::from_slice(&fs::read(&path)?)?;
        Ok((filename, config))
    }
}
