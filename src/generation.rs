//! Generation flows
//!
//! Application-level flows built from batches and pipelines: sound effects,
//! visual asset chains, config sections, block regeneration, the ledger-backed
//! game description, theme propagation and state analysis. Every flow returns a [`BatchReport`];
//! local persistence happens only after the remote work has finished.
//!
//! [`BatchReport`]: crate::batch::BatchReport

use crate::batch::BatchRunner;
use crate::config::{ForgeConfig, LedgerConfig};
use crate::dispatch::Dispatcher;
use crate::error::ForgeError;
use crate::merge::MergePolicy;
use crate::prompts::PromptLibrary;
use crate::provider::ProviderProfile;
use crate::store::{entry_at, AssetStore, ConfigLibrary, GameStore, Ledger, LedgerEntry};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub mod analysis;
pub mod audio;
pub mod blocks;
pub mod description;
pub mod propagation;
pub mod sections;
pub mod visuals;

pub use analysis::analyze_state;
pub use audio::{generate_sounds, SoundReport};
pub use blocks::{regenerate_block, BlockKind};
pub use description::{describe, hotload, LedgerOperation};
pub use propagation::{
    cohesive_chat, propagate_change, BlockChange, ChatRequest, MechanismConfig, ThemeSuggestion,
};
pub use sections::{generate_sections, SectionsReport};
pub use visuals::{asset_requests, generate_visuals, AssetRequest};

/// Everything a flow needs, passed explicitly.
#[derive(Clone)]
pub struct GenerationContext {
    pub runner: BatchRunner,
    pub providers: ProviderProfile,
    pub prompts: Arc<PromptLibrary>,
    pub store: GameStore,
    pub assets: AssetStore,
    pub configs: ConfigLibrary,
    pub merge: MergePolicy,
    pub ledger: LedgerConfig,
    pub soft_wait: Duration,
}

fn resolve(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

impl GenerationContext {
    /// Build the context for `game`; relative paths resolve against `workspace`.
    pub fn from_config(config: &ForgeConfig, workspace: &Path, game: &str) -> Result<Self, ForgeError> {
        let dispatcher = Arc::new(Dispatcher::new(&config.dispatch));
        let runner = BatchRunner::new(dispatcher)
            .with_timeouts(config.timeouts.clone())
            .with_deadline(config.pipeline.batch_deadline());
        let providers = ProviderProfile::from_config(&config.providers, &config.timeouts)?;

        let system = &config.system;
        let prompts = PromptLibrary::new(
            resolve(workspace, &system.prompts_dir),
            resolve(workspace, &system.schemas_dir),
        );
        let store = GameStore::new(&resolve(workspace, &system.data_root), game)?;
        let assets = AssetStore::new(
            resolve(workspace, &system.assets_dir),
            system
                .asset_mirrors
                .iter()
                .map(|m| resolve(workspace, m))
                .collect(),
        );

        Ok(Self {
            runner,
            providers,
            prompts: Arc::new(prompts),
            store,
            assets,
            configs: ConfigLibrary::new(resolve(workspace, &system.saved_configs_dir)),
            merge: config.merge.clone(),
            ledger: config.ledger.clone(),
            soft_wait: config.pipeline.soft_wait(),
        })
    }

    /// Ledger entry at `index`; negative indices count from the end.
    pub fn description_entry(&self, index: i64) -> Result<Option<LedgerEntry>, ForgeError> {
        let entries = Ledger::read_entries(&self.store.ledger_path())?;
        Ok(entry_at(&entries, index).cloned())
    }

    /// Latest game description as text, if any.
    pub fn current_description(&self) -> Result<Option<String>, ForgeError> {
        Ok(self
            .description_entry(-1)?
            .map(|entry| content_text(&entry.content)))
    }

    /// Description content at `index`, or an error pointing at `describe`.
    pub(crate) fn require_description(&self, index: i64) -> Result<Value, ForgeError> {
        self.description_entry(index)?
            .map(|entry| entry.content)
            .ok_or_else(|| {
                ForgeError::GenerationFailed(format!(
                    "No game description at ledger index {}; run `describe --operation initialize` first",
                    index
                ))
            })
    }
}

/// Plain text of a JSON value: strings unquoted, everything else pretty-printed.
pub(crate) fn content_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}
