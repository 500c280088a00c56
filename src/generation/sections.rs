//! Player, world and objects config sections, generated concurrently.
//!
//! The assembled `{world, player, objects}` document is written to the game's
//! `dsl_config.json` only when all three sections succeed.

use super::GenerationContext;
use crate::batch::BatchReport;
use crate::error::ForgeError;
use crate::job::{Job, JobKind};
use crate::provider::LlmRequest;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::PathBuf;
use tracing::{info, warn};

pub const SECTIONS: [&str; 3] = ["player", "world", "objects"];

#[derive(Debug, Clone, Serialize)]
pub struct SectionsReport {
    pub report: BatchReport,
    /// Set when the assembled config was written
    pub written: Option<PathBuf>,
}

/// Build one structured job per section; the label is the section name.
pub(crate) fn section_job(
    ctx: &GenerationContext,
    section: &str,
    description: &str,
) -> Result<Job, ForgeError> {
    let llm = ctx.providers.llm()?;
    let schema = ctx.prompts.schema(section)?;
    let system = ctx.prompts.render("config_system", &[])?;
    let prompt = ctx.prompts.render(
        "config_section",
        &[("description", description), ("section", section)],
    )?;
    Ok(Job::new(
        JobKind::Text,
        section,
        llm.job(LlmRequest::structured(system, prompt, schema)),
    ))
}

/// `{world, player, objects}` from a report, or `None` unless every section succeeded.
pub fn assemble(report: &BatchReport) -> Option<Value> {
    let mut config = Map::new();
    for section in ["world", "player", "objects"] {
        let value = report.by_label(section)?.payload()?.as_json()?;
        config.insert(section.to_string(), value.clone());
    }
    Some(Value::Object(config))
}

pub async fn generate_sections(
    ctx: &GenerationContext,
    description: &str,
) -> Result<SectionsReport, ForgeError> {
    let jobs = SECTIONS
        .iter()
        .map(|section| section_job(ctx, section, description))
        .collect::<Result<Vec<_>, _>>()?;
    let report = ctx.runner.run_batch(jobs).await?;

    let written = match assemble(&report) {
        Some(config) => {
            let path = ctx.store.write_config(&config)?;
            info!(path = %path.display(), "Game config written");
            Some(path)
        }
        None => {
            warn!(
                succeeded = report.success_count,
                failed = report.failure_count,
                "Config sections incomplete, nothing written"
            );
            None
        }
    };
    Ok(SectionsReport { report, written })
}
