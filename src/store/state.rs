//! Persisted StateRecord document for one game.

use crate::error::StorageError;
use crate::merge::{merge_document, MergePolicy, MergeSummary, StateDocument};
use crate::store::atomic::write_json_atomic;
use crate::store::lock::{WriterClaim, WriterRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub struct StateStore {
    path: PathBuf,
    registry: WriterRegistry,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, registry: WriterRegistry) -> Self {
        Self {
            path: path.into(),
            registry,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Missing file loads as an empty document.
    pub fn load(&self) -> Result<StateDocument, StorageError> {
        if !self.path.exists() {
            return Ok(StateDocument::default());
        }
        let bytes = fs::read(&self.path)?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(StateDocument::default());
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn save(&self, document: &StateDocument) -> Result<(), StorageError> {
        let _claim = self.registry.claim(&self.path)?;
        write_json_atomic(&self.path, document)
    }

    /// Merge `incoming` into the persisted document and write the result back.
    pub fn ingest(
        &self,
        incoming: &StateDocument,
        policy: &MergePolicy,
    ) -> Result<(StateDocument, MergeSummary), StorageError> {
        let mut update = self.begin_update()?;
        let (merged, summary) = merge_document(update.document(), incoming, policy);
        *update.document_mut() = merged;
        let merged = update.commit()?;
        info!(
            path = %self.path.display(),
            added = summary.added.len(),
            preserved = summary.preserved.len(),
            replaced = summary.replaced.len(),
            dropped = summary.dropped.len(),
            "State merged"
        );
        Ok((merged, summary))
    }

    /// Claim the file and load it for a read-modify-write cycle.
    pub fn begin_update(&self) -> Result<StateUpdate<'_>, StorageError> {
        let claim = self.registry.claim(&self.path)?;
        let document = self.load()?;
        Ok(StateUpdate {
            store: self,
            document,
            _claim: claim,
        })
    }
}

/// Exclusive, in-progress update. Dropping it without `commit` discards changes.
pub struct StateUpdate<'a> {
    store: &'a StateStore,
    document: StateDocument,
    _claim: WriterClaim,
}

impl StateUpdate<'_> {
    pub fn document(&self) -> &StateDocument {
        &self.document
    }

    pub fn document_mut(&mut self) -> &mut StateDocument {
        &mut self.document
    }

    pub fn commit(self) -> Result<StateDocument, StorageError> {
        write_json_atomic(&self.store.path, &self.document)?;
        Ok(self.document)
    }
}
