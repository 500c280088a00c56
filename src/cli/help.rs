//! Command-name contract used in logs.

use crate::cli::parse::{Commands, ConfigCommands, LedgerCommands};

/// Dotted command name (e.g. "ledger.show", "block").
pub fn command_name(command: &Commands) -> String {
    match command {
        Commands::Merge { .. } => "merge".to_string(),
        Commands::Analyze => "analyze".to_string(),
        Commands::Describe { .. } => "describe".to_string(),
        Commands::Ledger { command } => format!("ledger.{}", ledger_command_name(command)),
        Commands::Configure { .. } => "configure".to_string(),
        Commands::Visuals { .. } => "visuals".to_string(),
        Commands::Audio { .. } => "audio".to_string(),
        Commands::Block { .. } => "block".to_string(),
        Commands::Propagate { .. } => "propagate".to_string(),
        Commands::Chat { .. } => "chat".to_string(),
        Commands::Config { command } => format!("config.{}", config_command_name(command)),
        Commands::Status => "status".to_string(),
    }
}

pub fn config_command_name(command: &ConfigCommands) -> &'static str {
    match command {
        ConfigCommands::Save { .. } => "save",
        ConfigCommands::List => "list",
        ConfigCommands::Load { .. } => "load",
    }
}

pub fn ledger_command_name(command: &LedgerCommands) -> &'static str {
    match command {
        LedgerCommands::Show => "show",
        LedgerCommands::Regenerate => "regenerate",
        LedgerCommands::Initialize => "initialize",
    }
}

/// Whether the command calls remote services.
pub fn is_remote(command: &Commands) -> bool {
    match command {
        Commands::Describe { operation, .. } => operation != "hotload",
        Commands::Merge { .. } | Commands::Ledger { .. } | Commands::Config { .. } | Commands::Status => false,
        _ => true,
    }
}
