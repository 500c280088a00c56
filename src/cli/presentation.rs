//! CLI presentation: text and JSON rendering of reports and store views.

mod report;
mod store;

pub use report::{
    format_batch_report, format_sections_report, format_sound_report, format_theme,
    payload_summary,
};
pub use store::{
    format_config_file, format_ledger_entries, format_merge_summary, format_saved_configs,
    format_status, StatusView,
};

use crate::cli::parse::OutputFormat;
use crate::error::ForgeError;
use owo_colors::OwoColorize;
use serde::Serialize;

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String, ForgeError> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub(crate) fn title(text: &str, format: OutputFormat) -> String {
    match format {
        OutputFormat::Text => format!("{}", text.bold().underline()),
        OutputFormat::Json => text.to_string(),
    }
}
