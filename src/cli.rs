//! CLI domain: parse, route, help, output, and presentation only.
//! No domain orchestration; single route table dispatches to generation flows.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::command_name;
pub use output::map_error;
pub use parse::{BlockArg, Cli, Commands, ConfigCommands, LedgerCommands, MechanismArgs, OutputFormat};
pub use presentation::{
    format_batch_report, format_ledger_entries, format_merge_summary, format_sections_report,
    format_sound_report, format_status, payload_summary, StatusView,
};
pub use route::RunContext;
