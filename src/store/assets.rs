//! Generated asset files: one primary directory plus any number of mirrors.

use crate::batch::ResultSink;
use crate::error::StorageError;
use crate::job::{JobResult, Payload};
use crate::store::atomic::write_atomic;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct AssetStore {
    primary: PathBuf,
    mirrors: Vec<PathBuf>,
}

/// Lowercase and restrict to `[a-z0-9_]`.
pub fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|c| c == '_') {
        "asset".to_string()
    } else {
        cleaned
    }
}

fn encode(payload: &Payload) -> Result<(Vec<u8>, &'static str), StorageError> {
    match payload {
        Payload::Media(media) => Ok((media.bytes.clone(), media.extension())),
        Payload::Json(value) => Ok((serde_json::to_vec_pretty(value)?, "json")),
        Payload::Text(text) => Ok((text.as_bytes().to_vec(), "txt")),
    }
}

impl AssetStore {
    pub fn new(primary: impl Into<PathBuf>, mirrors: Vec<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            mirrors,
        }
    }

    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Write `payload` as `<sanitized name>.<ext>` into the primary directory
    /// and every mirror. Returns the primary path.
    pub fn save(&self, name: &str, payload: &Payload) -> Result<PathBuf, StorageError> {
        let (bytes, extension) = encode(payload)?;
        let file_name = format!("{}.{}", sanitize_name(name), extension);
        let primary = self.primary.join(&file_name);
        write_atomic(&primary, &bytes)?;
        for mirror in &self.mirrors {
            write_atomic(&mirror.join(&file_name), &bytes)?;
        }
        debug!(path = %primary.display(), bytes = bytes.len(), mirrors = self.mirrors.len(), "Asset saved");
        Ok(primary)
    }
}

impl ResultSink for AssetStore {
    fn persist(&self, result: &JobResult, payload: &Payload) -> Result<PathBuf, StorageError> {
        self.save(&result.label, payload)
    }
}
