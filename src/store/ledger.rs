//! Batch ledger: an ordered JSON array of `{id, content}` entries.
//!
//! Append-only apart from [`Ledger::regenerate`] (drop the latest entry),
//! [`Ledger::initialize`] (clear) and [`Ledger::replace`] (swap in a list built
//! elsewhere). Every mutation rewrites the file atomically. An open ledger
//! holds the file's writer claim until dropped.

use crate::error::StorageError;
use crate::store::atomic::write_json_atomic;
use crate::store::lock::{WriterClaim, WriterRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub content: Value,
}

#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
    _claim: WriterClaim,
}

impl Ledger {
    pub fn open(path: impl Into<PathBuf>, registry: &WriterRegistry) -> Result<Self, StorageError> {
        let path = path.into();
        let claim = registry.claim(&path)?;
        let entries = Self::read_entries(&path)?;
        Ok(Self {
            path,
            entries,
            _claim: claim,
        })
    }

    /// Read without claiming, for display.
    pub fn read_entries(path: &Path) -> Result<Vec<LedgerEntry>, StorageError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let bytes = fs::read(path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn append(&mut self, id: impl Into<String>, content: Value) -> Result<(), StorageError> {
        self.entries.push(LedgerEntry {
            id: id.into(),
            content,
        });
        self.flush()
    }

    /// Remove and return the latest entry.
    pub fn regenerate(&mut self) -> Result<Option<LedgerEntry>, StorageError> {
        let removed = self.entries.pop();
        if removed.is_some() {
            self.flush()?;
        }
        Ok(removed)
    }

    pub fn initialize(&mut self) -> Result<(), StorageError> {
        self.entries.clear();
        self.flush()
    }

    /// Swap in `entries` with a single write.
    pub fn replace(&mut self, entries: Vec<LedgerEntry>) -> Result<(), StorageError> {
        self.entries = entries;
        self.flush()
    }

    fn flush(&self) -> Result<(), StorageError> {
        write_json_atomic(&self.path, &self.entries)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "Ledger saved");
        Ok(())
    }
}

/// The last `k` of `entries`, oldest first.
pub fn recent_entries(entries: &[LedgerEntry], k: usize) -> &[LedgerEntry] {
    let start = entries.len().saturating_sub(k);
    &entries[start..]
}

/// Entry at `index`; negative indices count from the end (`-1` is the latest).
pub fn entry_at(entries: &[LedgerEntry], index: i64) -> Option<&LedgerEntry> {
    let resolved = if index < 0 {
        entries.len().checked_sub(index.unsigned_abs() as usize)?
    } else {
        index as usize
    };
    entries.get(resolved)
}
