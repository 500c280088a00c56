//! CLI parse: clap types for gamiforge. No behavior; definitions only.

use crate::generation::BlockKind;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Gamiforge - bounded-concurrency generation backend for game configs and assets
#[derive(Parser)]
#[command(name = "gamiforge")]
#[command(about = "Generate game configuration, images and sounds from a running description")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (replaces global and workspace config files)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Game id; state, ledger and config live under `<data_root>/<game>/`
    #[arg(long, global = true, default_value = "default")]
    pub game: String,

    /// Enable logging (default: off)
    #[arg(long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file, file+stderr)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output includes "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Output format for reports
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BlockArg {
    Player,
    World,
    Object,
}

impl From<BlockArg> for BlockKind {
    fn from(arg: BlockArg) -> Self {
        match arg {
            BlockArg::Player => BlockKind::Player,
            BlockArg::World => BlockKind::World,
            BlockArg::Object => BlockKind::Object,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Merge an incoming state document into the game's persisted state
    Merge {
        /// JSON file with `{"records": [...]}`
        #[arg(long)]
        incoming: PathBuf,
    },
    /// Analyze every image record that has no analysis yet
    Analyze,
    /// Generate the game description (ledger-backed)
    Describe {
        /// initialize, regenerate, hotload, or any label for a revision
        #[arg(long)]
        operation: String,
        /// Requested change; for hotload, the ledger index to show
        #[arg(long, default_value = "", allow_hyphen_values = true)]
        prompt: String,
    },
    /// Inspect or edit the description ledger
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
    /// Generate the player, world and objects config sections
    Configure {
        /// Ledger entry to use; negative counts from the latest
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        entry: i64,
    },
    /// Generate visual assets flagged in the description
    Visuals {
        /// Suffix appended to saved file names
        #[arg(long)]
        marker: Option<String>,
        /// Ledger entry to use; negative counts from the latest
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        entry: i64,
    },
    /// Generate the ambient and jump sounds
    Audio {
        /// Ledger entry to use; negative counts from the latest
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        entry: i64,
    },
    /// Regenerate one block (asset and config)
    Block {
        #[arg(value_enum)]
        block: BlockArg,
        /// Requested change
        #[arg(long)]
        content: String,
        /// JSON file with the block's current config
        #[arg(long)]
        current: Option<PathBuf>,
    },
    /// Suggest a matching theme for every block after one block changed
    Propagate {
        /// Block that changed (player, world or an object slot)
        #[arg(long)]
        block: String,
        #[arg(long)]
        new_content: String,
        #[arg(long, default_value = "")]
        old_content: String,
        #[command(flatten)]
        mechanism: MechanismArgs,
    },
    /// Theme the whole game from a message and/or an image
    Chat {
        #[arg(long, default_value = "")]
        message: String,
        /// PNG, JPEG or WEBP file to base the theme on
        #[arg(long)]
        image: Option<PathBuf>,
        /// JSON file with the current per-block descriptions
        #[arg(long)]
        current: Option<PathBuf>,
        #[command(flatten)]
        mechanism: MechanismArgs,
    },
    /// Save, list or load named game configs
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Show resolved configuration and configured providers
    Status,
}

#[derive(Args, Debug, Clone)]
pub struct MechanismArgs {
    /// Game mechanism name
    #[arg(long, default_value = "dodge and catch")]
    pub mechanism: String,
    /// JSON file with `{description, objects, narrative}`; dodge and catch when omitted
    #[arg(long)]
    pub mechanism_config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Save a config under a name
    Save {
        name: String,
        /// JSON file to save; the game's assembled config when omitted
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// List saved configs, newest first
    List,
    /// Show a saved config
    Load {
        name: String,
        /// Also make it the game's assembled config
        #[arg(long, default_value = "false")]
        apply: bool,
    },
}

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// List entries, oldest first
    Show,
    /// Drop the latest entry
    Regenerate,
    /// Clear the ledger
    Initialize,
}
