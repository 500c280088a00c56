//! Batch report presentation: one table row per job plus a summary.

use super::{title, to_json};
use crate::batch::BatchReport;
use crate::cli::parse::OutputFormat;
use crate::error::ForgeError;
use crate::generation::{SectionsReport, SoundReport, ThemeSuggestion};
use crate::job::{Outcome, Payload};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

const DETAIL_WIDTH: usize = 60;

fn truncate(text: &str) -> String {
    let text = text.replace('\n', " ");
    if text.chars().count() <= DETAIL_WIDTH {
        text
    } else {
        let cut: String = text.chars().take(DETAIL_WIDTH).collect();
        format!("{}…", cut)
    }
}

/// One-line description of a payload.
pub fn payload_summary(payload: &Payload) -> String {
    match payload {
        Payload::Media(media) => format!("{}, {} bytes", media.content_type, media.size),
        Payload::Json(value) => truncate(&value.to_string()),
        Payload::Text(text) => truncate(text),
    }
}

fn report_text(name: &str, report: &BatchReport) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Job", "Label", "Kind", "Status", "Dispatched", "Elapsed", "Detail"]);
    for result in &report.results {
        let (status, detail) = match &result.outcome {
            Outcome::Success { payload } => ("ok".green().to_string(), payload_summary(payload)),
            Outcome::Failure { failure } => (
                failure.kind.to_string().red().to_string(),
                truncate(&failure.message),
            ),
        };
        table.add_row(vec![
            result.job_id.to_string(),
            result.label.clone(),
            result.kind.to_string(),
            status,
            if result.dispatched { "yes" } else { "no" }.to_string(),
            format!("{} ms", result.elapsed_ms),
            detail,
        ]);
    }

    let mut out = format!("{}\n{}\n", title(name, OutputFormat::Text), table);
    out.push_str(&format!(
        "\n{} succeeded, {} failed in {} ms\n",
        report.success_count.green(),
        report.failure_count.red(),
        report.elapsed_ms
    ));
    if report.deadline_exceeded {
        out.push_str(&format!("{}\n", "Batch deadline exceeded".yellow()));
    }
    for saved in &report.persisted {
        out.push_str(&format!("  saved {} ({})\n", saved.path.display(), saved.job_id));
    }
    for failed in &report.persistence_failures {
        out.push_str(&format!(
            "  {} {}: {}\n",
            "not saved".yellow(),
            failed.job_id,
            failed.message
        ));
    }
    out
}

pub fn format_batch_report(
    name: &str,
    report: &BatchReport,
    format: OutputFormat,
) -> Result<String, ForgeError> {
    match format {
        OutputFormat::Json => to_json(report),
        OutputFormat::Text => Ok(report_text(name, report)),
    }
}

pub fn format_sound_report(report: &SoundReport, format: OutputFormat) -> Result<String, ForgeError> {
    match format {
        OutputFormat::Json => to_json(report),
        OutputFormat::Text => Ok(format!(
            "{}\n{}",
            report_text("Sound prompts", &report.prompts),
            report_text("Sounds", &report.audio)
        )),
    }
}

pub fn format_sections_report(
    report: &SectionsReport,
    format: OutputFormat,
) -> Result<String, ForgeError> {
    match format {
        OutputFormat::Json => to_json(report),
        OutputFormat::Text => {
            let mut out = report_text("Config sections", &report.report);
            match &report.written {
                Some(path) => out.push_str(&format!("Config written to {}\n", path.display())),
                None => out.push_str(&format!(
                    "{}\n",
                    "Some sections failed; config not written".yellow()
                )),
            }
            Ok(out)
        }
    }
}

pub fn format_theme(suggestion: &ThemeSuggestion, format: OutputFormat) -> Result<String, ForgeError> {
    if format == OutputFormat::Json {
        return to_json(suggestion);
    }
    let mut table = Table::new();
    table.load_preset(UTF8_BORDERS_ONLY);
    table.set_header(vec!["Block", "Description"]);
    for (block, value) in &suggestion.theme {
        let text = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
        table.add_row(vec![block.clone(), text]);
    }
    let mut out = format!("{}\n{}\n", title("Theme", OutputFormat::Text), table);
    if suggestion.fallback {
        out.push_str(&format!("{}\n", "Generation failed; showing the fallback theme".yellow()));
        out.push_str(&report_text("Theme jobs", &suggestion.report));
    }
    Ok(out)
}
