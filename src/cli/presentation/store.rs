//! Store presentation: merge summaries, ledger entries and status.

use super::{title, to_json};
use crate::cli::parse::OutputFormat;
use crate::error::ForgeError;
use crate::generation::content_text;
use crate::merge::MergeSummary;
use crate::store::{LedgerEntry, SavedConfig};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::Path;

pub fn format_merge_summary(summary: &MergeSummary, format: OutputFormat) -> Result<String, ForgeError> {
    if format == OutputFormat::Json {
        return to_json(summary);
    }
    let mut out = title("State merged", format);
    for (name, ids) in [
        ("preserved", &summary.preserved),
        ("replaced", &summary.replaced),
        ("added", &summary.added),
        ("dropped", &summary.dropped),
    ] {
        out.push_str(&format!("\n  {:<10} {}", name, ids.len()));
        if !ids.is_empty() {
            out.push_str(&format!("  ({})", ids.join(", ")));
        }
    }
    Ok(out)
}

pub fn format_ledger_entries(entries: &[LedgerEntry], format: OutputFormat) -> Result<String, ForgeError> {
    if format == OutputFormat::Json {
        return to_json(&json!({ "entries": entries, "total": entries.len() }));
    }
    if entries.is_empty() {
        return Ok("Ledger is empty.\n\nUse 'gamiforge describe --operation initialize' to start one.".to_string());
    }
    let mut out = String::new();
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!("{}. {}\n{}\n\n", i + 1, entry.id, content_text(&entry.content)));
    }
    out.push_str(&format!("Total: {} entr{}", entries.len(), if entries.len() == 1 { "y" } else { "ies" }));
    Ok(out)
}

pub fn format_saved_configs(
    files: &[SavedConfig],
    dir: &Path,
    format: OutputFormat,
) -> Result<String, ForgeError> {
    if format == OutputFormat::Json {
        return to_json(&json!({ "files": files, "dir": dir }));
    }
    if files.is_empty() {
        return Ok(format!(
            "No saved configs in {}.\n\nUse 'gamiforge config save <name>' to add one.",
            dir.display()
        ));
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["File", "Size", "Modified"]);
    for file in files {
        table.add_row(vec![file.filename.clone(), format!("{} B", file.size), file.modified.clone()]);
    }
    Ok(format!("{}\n{}", title("Saved configs", format), table))
}

/// Result of `config save` or `config load`.
pub fn format_config_file(
    filename: &str,
    config: Option<&Value>,
    written_to: Option<&Path>,
    format: OutputFormat,
) -> Result<String, ForgeError> {
    if format == OutputFormat::Json {
        return to_json(&json!({
            "filename": filename,
            "config": config,
            "written_to": written_to,
        }));
    }
    let mut out = match config {
        Some(config) => format!("{}\n{}", title(filename, format), serde_json::to_string_pretty(config)?),
        None => format!("Saved {}", filename),
    };
    if let Some(path) = written_to {
        out.push_str(&format!("\nWritten to {}", path.display()));
    }
    Ok(out)
}

/// Resolved settings shown by `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub workspace: String,
    pub game: String,
    pub game_dir: String,
    pub global_config: Option<String>,
    /// (kind, cap, timeout seconds)
    pub kinds: Vec<(String, usize, u64)>,
    pub providers: Vec<String>,
    pub ledger_entries: usize,
    pub state_records: usize,
}

pub fn format_status(view: &StatusView, format: OutputFormat) -> Result<String, ForgeError> {
    if format == OutputFormat::Json {
        return to_json(view);
    }
    let mut out = title("Gamiforge status", format);
    out.push_str(&format!("\n  Workspace: {}", view.workspace));
    out.push_str(&format!("\n  Game: {} ({})", view.game, view.game_dir));
    out.push_str(&format!(
        "\n  Global config: {}",
        view.global_config.as_deref().unwrap_or("(none)")
    ));
    out.push_str(&format!(
        "\n  State records: {}, ledger entries: {}",
        view.state_records, view.ledger_entries
    ));
    out.push_str(&format!(
        "\n  Providers: {}\n\n",
        if view.providers.is_empty() {
            "(none configured)".to_string()
        } else {
            view.providers.join(", ")
        }
    ));

    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Kind", "Cap", "Timeout"]);
    for (kind, cap, timeout) in &view.kinds {
        table.add_row(vec![kind.clone(), cap.to_string(), format!("{} s", timeout)]);
    }
    out.push_str(&table.to_string());
    Ok(out)
}
