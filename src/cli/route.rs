//! CLI route: single route table and run context. Dispatches to domain flows and presentation.

use crate::cli::help::{command_name, is_remote};
use crate::cli::parse::{Commands, ConfigCommands, LedgerCommands, MechanismArgs, OutputFormat};
use crate::cli::presentation::{
    format_batch_report, format_config_file, format_ledger_entries, format_merge_summary,
    format_saved_configs, format_sections_report, format_sound_report, format_status,
    format_theme, StatusView,
};
use crate::config::{ConfigLoader, ForgeConfig};
use crate::error::{ForgeError, StorageError};
use crate::generation::{
    analyze_state, asset_requests, cohesive_chat, content_text, describe, generate_sections,
    generate_sounds, generate_visuals, hotload, propagate_change, regenerate_block, BlockChange,
    ChatRequest, GenerationContext, LedgerOperation, MechanismConfig,
};
use crate::job::JobKind;
use crate::merge::StateDocument;
use crate::provider::SoundType;
use crate::store::Ledger;
use serde_json::{Map, Value};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, info_span};

/// Runtime context for CLI execution: workspace, resolved config and game.
pub struct RunContext {
    workspace_root: PathBuf,
    config: ForgeConfig,
    game: String,
    format: OutputFormat,
}

impl RunContext {
    /// Load and validate configuration for `workspace_root` (or the explicit file).
    pub fn new(
        workspace_root: PathBuf,
        config_path: Option<PathBuf>,
        game: String,
        format: OutputFormat,
    ) -> Result<Self, ForgeError> {
        let config = ConfigLoader::load_validated(&workspace_root, config_path.as_deref())?;
        Ok(Self::with_config(workspace_root, config, game, format))
    }

    pub fn with_config(
        workspace_root: PathBuf,
        config: ForgeConfig,
        game: String,
        format: OutputFormat,
    ) -> Self {
        Self {
            workspace_root,
            config,
            game,
            format,
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    fn generation(&self) -> Result<GenerationContext, ForgeError> {
        GenerationContext::from_config(&self.config, &self.workspace_root, &self.game)
    }

    fn block_on<F: Future>(&self, future: F) -> Result<F::Output, ForgeError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| ForgeError::ConfigError(format!("Failed to start async runtime: {}", e)))?;
        Ok(runtime.block_on(future))
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ForgeError> {
        let name = command_name(command);
        let span = info_span!("command", name = %name, game = %self.game);
        let _entered = span.enter();
        let started = Instant::now();
        let result = self.execute_inner(command);
        info!(
            ok = result.is_ok(),
            remote = is_remote(command),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Command finished"
        );
        result
    }

    fn execute_inner(&self, command: &Commands) -> Result<String, ForgeError> {
        let format = self.format;
        match command {
            Commands::Merge { incoming } => {
                let incoming: StateDocument = read_json_file(incoming)?;
                let ctx = self.generation()?;
                let (_, summary) = ctx.store.state().ingest(&incoming, &ctx.merge)?;
                format_merge_summary(&summary, format)
            }
            Commands::Analyze => {
                let ctx = self.generation()?;
                let report = self.block_on(analyze_state(&ctx))??;
                format_batch_report("State analysis", &report, format)
            }
            Commands::Describe { operation, prompt } => {
                let ctx = self.generation()?;
                match LedgerOperation::parse(operation) {
                    LedgerOperation::Hotload => {
                        let entry = hotload(&ctx, prompt)?;
                        format_ledger_entries(std::slice::from_ref(&entry), format)
                    }
                    operation => {
                        let report = self.block_on(describe(&ctx, &operation, prompt))??;
                        format_batch_report("Game description", &report, format)
                    }
                }
            }
            Commands::Ledger { command } => self.handle_ledger(command),
            Commands::Configure { entry } => {
                let ctx = self.generation()?;
                let description = content_text(&ctx.require_description(*entry)?);
                let report = self.block_on(generate_sections(&ctx, &description))??;
                format_sections_report(&report, format)
            }
            Commands::Visuals { marker, entry } => {
                let ctx = self.generation()?;
                let description = ctx.require_description(*entry)?;
                let requests = asset_requests(&ctx, &description)?;
                let report =
                    self.block_on(generate_visuals(&ctx, &requests, marker.as_deref()))??;
                format_batch_report("Visual assets", &report, format)
            }
            Commands::Audio { entry } => {
                let ctx = self.generation()?;
                let description = content_text(&ctx.require_description(*entry)?);
                let sounds = [SoundType::Ambient, SoundType::Jump];
                let report = self.block_on(generate_sounds(&ctx, &description, &sounds))??;
                format_sound_report(&report, format)
            }
            Commands::Block {
                block,
                content,
                current,
            } => {
                let ctx = self.generation()?;
                let current: Option<Value> = current.as_deref().map(read_json_file).transpose()?;
                let report = self.block_on(regenerate_block(
                    &ctx,
                    (*block).into(),
                    content,
                    current.as_ref(),
                ))??;
                format_batch_report("Block", &report, format)
            }
            Commands::Propagate {
                block,
                new_content,
                old_content,
                mechanism,
            } => {
                let ctx = self.generation()?;
                let config = read_mechanism(mechanism)?;
                let change = BlockChange {
                    block: block.clone(),
                    old_content: old_content.clone(),
                    new_content: new_content.clone(),
                };
                let suggestion = self.block_on(propagate_change(
                    &ctx,
                    &mechanism.mechanism,
                    config.as_ref(),
                    &change,
                ))??;
                format_theme(&suggestion, format)
            }
            Commands::Chat {
                message,
                image,
                current,
                mechanism,
            } => {
                let ctx = self.generation()?;
                let config = read_mechanism(mechanism)?;
                let current: Map<String, Value> = match current {
                    Some(path) => read_json_file(path)?,
                    None => Map::new(),
                };
                let chat = ChatRequest {
                    message: message.clone(),
                    image: image.clone(),
                    current,
                };
                let suggestion = self.block_on(cohesive_chat(
                    &ctx,
                    &mechanism.mechanism,
                    config.as_ref(),
                    &chat,
                ))??;
                format_theme(&suggestion, format)
            }
            Commands::Config { command } => self.handle_config(command),
            Commands::Status => self.handle_status(),
        }
    }

    fn handle_ledger(&self, command: &LedgerCommands) -> Result<String, ForgeError> {
        let ctx = self.generation()?;
        let entries = match command {
            LedgerCommands::Show => Ledger::read_entries(&ctx.store.ledger_path())?,
            LedgerCommands::Regenerate => {
                let mut ledger = ctx.store.open_ledger()?;
                ledger.regenerate()?;
                ledger.entries().to_vec()
            }
            LedgerCommands::Initialize => {
                let mut ledger = ctx.store.open_ledger()?;
                ledger.initialize()?;
                ledger.entries().to_vec()
            }
        };
        format_ledger_entries(&entries, self.format)
    }

    fn handle_config(&self, command: &ConfigCommands) -> Result<String, ForgeError> {
        let ctx = self.generation()?;
        match command {
            ConfigCommands::Save { name, file } => {
                let config: Value = match file {
                    Some(path) => read_json_file(path)?,
                    None => ctx
                        .store
                        .read_config()?
                        .ok_or_else(|| StorageError::NotFound(ctx.store.config_path()))?,
                };
                let filename = ctx.configs.save(name, &config)?;
                format_config_file(&filename, None, Some(&ctx.configs.dir().join(&filename)), self.format)
            }
            ConfigCommands::List => {
                format_saved_configs(&ctx.configs.list()?, ctx.configs.dir(), self.format)
            }
            ConfigCommands::Load { name, apply } => {
                let (filename, config) = ctx.configs.load(name)?;
                let written = if *apply {
                    Some(ctx.store.write_config(&config)?)
                } else {
                    None
                };
                format_config_file(&filename, Some(&config), written.as_deref(), self.format)
            }
        }
    }

    fn handle_status(&self) -> Result<String, ForgeError> {
        let ctx = self.generation()?;
        let view = StatusView {
            workspace: self.workspace_root.display().to_string(),
            game: self.game.clone(),
            game_dir: ctx.store.dir().display().to_string(),
            global_config: ConfigLoader::xdg_config_path()
                .filter(|p| p.exists())
                .map(|p| p.display().to_string()),
            kinds: JobKind::ALL
                .iter()
                .map(|kind| {
                    (
                        kind.to_string(),
                        self.config.dispatch.cap(*kind),
                        self.config.timeouts.for_kind(*kind).as_secs(),
                    )
                })
                .collect(),
            providers: ctx
                .providers
                .configured()
                .into_iter()
                .map(str::to_string)
                .collect(),
            ledger_entries: Ledger::read_entries(&ctx.store.ledger_path())?.len(),
            state_records: ctx.store.state().load()?.records.len(),
        };
        format_status(&view, self.format)
    }
}

fn read_mechanism(args: &MechanismArgs) -> Result<Option<MechanismConfig>, ForgeError> {
    args.mechanism_config.as_deref().map(read_json_file).transpose()
}

fn read_json_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ForgeError> {
    if !path.exists() {
        return Err(StorageError::NotFound(path.to_path_buf()).into());
    }
    let bytes = std::fs::read(path).map_err(StorageError::from)?;
    Ok(serde_json::from_slice(&bytes)?)
}
