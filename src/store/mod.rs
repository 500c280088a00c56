//! Local persistence
//!
//! Everything a generation flow writes lives under `<data_root>/<game>/` (state
//! document, ledger, assembled config), the shared saved-config library or the
//! asset directories. All writes are
//! whole-file atomic replacements, and read-modify-write cycles hold a
//! [`WriterClaim`] so two writers can never interleave on one file.

pub mod assets;
pub mod atomic;
pub mod ledger;
pub mod library;
pub mod lock;
pub mod state;

pub use assets::{sanitize_name, AssetStore};
pub use atomic::{write_atomic, write_json_atomic};
pub use ledger::{entry_at, recent_entries, Ledger, LedgerEntry};
pub use library::{ConfigLibrary, SavedConfig};
pub use lock::{WriterClaim, WriterRegistry};
pub use state::{StateStore, StateUpdate};

use crate::error::StorageError;
use serde_json::Value;
use std::path::{Path, PathBuf};

const STATE_FILE: &str = "state.json";
const LEDGER_FILE: &str = "ledger.json";
const CONFIG_FILE: &str = "dsl_config.json";

/// Per-game storage directory.
#[derive(Debug, Clone)]
pub struct GameStore {
    dir: PathBuf,
    registry: WriterRegistry,
}

impl GameStore {
    pub fn new(data_root: &Path, game: &str) -> Result<Self, StorageError> {
        Self::with_registry(data_root, game, WriterRegistry::global().clone())
    }

    pub fn with_registry(
        data_root: &Path,
        game: &str,
        registry: WriterRegistry,
    ) -> Result<Self, StorageError> {
        let valid = !game.is_empty()
            && game
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidPath(format!(
                "Invalid game id '{}': use letters, digits, '_' or '-'",
                game
            )));
        }
        Ok(Self {
            dir: data_root.join(game),
            registry,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn registry(&self) -> &WriterRegistry {
        &self.registry
    }

    pub fn state(&self) -> StateStore {
        StateStore::new(self.dir.join(STATE_FILE), self.registry.clone())
    }

    pub fn ledger_path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE)
    }

    pub fn open_ledger(&self) -> Result<Ledger, StorageError> {
        Ledger::open(self.ledger_path(), &self.registry)
    }

    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE)
    }

    pub fn write_config(&self, config: &Value) -> Result<PathBuf, StorageError> {
        let path = self.config_path();
        let _claim = self.registry.claim(&path)?;
        write_json_atomic(&path, config)?;
        Ok(path)
    }

    /// Saved config, if any.
    pub fn read_config(&self) -> Result<Option<Value>, StorageError> {
        let path = self.config_path();
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&std::fs::read(path)?)?))
    }
}
