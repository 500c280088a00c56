//! In-process single-writer registry for persisted files.
//!
//! A writer claims a path before a read-modify-write cycle; a second claim on the
//! same path fails with [`StorageError::ConcurrentWriter`] until the first claim
//! is dropped.

use crate::error::StorageError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::warn;

#[derive(Debug, Clone, Default)]
pub struct WriterRegistry {
    held: Arc<Mutex<HashSet<PathBuf>>>,
}

impl WriterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every store in this process.
    pub fn global() -> &'static WriterRegistry {
        static GLOBAL: OnceLock<WriterRegistry> = OnceLock::new();
        GLOBAL.get_or_init(WriterRegistry::new)
    }

    fn key(path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(path))
                .unwrap_or_else(|_| path.to_path_buf())
        }
    }

    pub fn claim(&self, path: &Path) -> Result<WriterClaim, StorageError> {
        let key = Self::key(path);
        let mut held = self.held.lock();
        if !held.insert(key.clone()) {
            warn!(path = %key.display(), "Rejected concurrent writer");
            return Err(StorageError::ConcurrentWriter(key));
        }
        Ok(WriterClaim {
            held: Arc::clone(&self.held),
            path: key,
        })
    }

    pub fn is_held(&self, path: &Path) -> bool {
        self.held.lock().contains(&Self::key(path))
    }
}

/// Exclusive write access to one path; released on drop.
#[derive(Debug)]
pub struct WriterClaim {
    held: Arc<Mutex<HashSet<PathBuf>>>,
    path: PathBuf,
}

impl WriterClaim {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WriterClaim {
    fn drop(&mut self) {
        self.held.lock().remove(&self.path);
    }
}
