//! Ledger-backed game description.

use super::{content_text, GenerationContext};
use crate::batch::BatchReport;
use crate::error::ForgeError;
use crate::job::{Job, JobKind, Payload};
use crate::provider::LlmRequest;
use crate::store::{recent_entries, LedgerEntry};
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

/// What to do with the ledger before generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerOperation {
    /// Start over from an empty ledger.
    Initialize,
    /// Replace the latest entry with a new one.
    Regenerate,
    /// Select an existing entry instead of generating.
    Hotload,
    /// Append a new revision.
    Revise(String),
}

impl LedgerOperation {
    pub fn parse(label: &str) -> Self {
        match label {
            "initialize" => LedgerOperation::Initialize,
            "regenerate" => LedgerOperation::Regenerate,
            "hotload" => LedgerOperation::Hotload,
            other => LedgerOperation::Revise(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            LedgerOperation::Initialize => "initialize",
            LedgerOperation::Regenerate => "regenerate",
            LedgerOperation::Hotload => "hotload",
            LedgerOperation::Revise(label) => label,
        }
    }
}

impl fmt::Display for LedgerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generate a structured game description and record it in the ledger as
/// `{id: "<operation>:<prompt>", content}`.
///
/// The entry list the operation implies is built in memory; the ledger file
/// is rewritten once, and only when the model returned a description. A
/// failed call leaves the ledger as it was. The ledger stays claimed for the
/// whole call.
pub async fn describe(
    ctx: &GenerationContext,
    operation: &LedgerOperation,
    prompt: &str,
) -> Result<BatchReport, ForgeError> {
    if *operation == LedgerOperation::Hotload {
        return Err(ForgeError::GenerationFailed(
            "Hotload selects an existing description and generates nothing".to_string(),
        ));
    }
    let llm = ctx.providers.llm()?;
    let mut ledger = ctx.store.open_ledger()?;
    let mut working: Vec<LedgerEntry> = match operation {
        LedgerOperation::Initialize => Vec::new(),
        LedgerOperation::Regenerate => {
            let mut entries = ledger.entries().to_vec();
            entries.pop();
            entries
        }
        _ => ledger.entries().to_vec(),
    };

    let history = recent_entries(&working, ctx.ledger.context_window)
        .iter()
        .map(|entry| format!("[{}]\n{}", entry.id, content_text(&entry.content)))
        .collect::<Vec<_>>()
        .join("\n\n");
    let history = if history.is_empty() {
        "(none)".to_string()
    } else {
        history
    };
    let state = ctx.store.state().load()?;
    let state = serde_json::to_string_pretty(&state.records)?;

    let system = ctx.prompts.render("description_system", &[])?;
    let request = ctx.prompts.render(
        "description_prompt",
        &[
            ("operation", operation.as_str()),
            ("prompt", prompt),
            ("history", history.as_str()),
            ("state", state.as_str()),
        ],
    )?;
    let schema = ctx.prompts.schema("game_description")?;
    let job = Job::new(
        JobKind::Text,
        "description",
        llm.job(LlmRequest::structured(system, request, schema)),
    );
    let report = ctx.runner.run_batch(vec![job]).await?;

    if let Some(payload) = report.results.first().and_then(|r| r.payload()) {
        let content = match payload {
            Payload::Json(value) => value.clone(),
            Payload::Text(text) => Value::String(text.clone()),
            Payload::Media(_) => {
                return Err(ForgeError::GenerationFailed(
                    "Description endpoint returned media".to_string(),
                ))
            }
        };
        working.push(LedgerEntry {
            id: format!("{}:{}", operation, prompt),
            content,
        });
        ledger.replace(working)?;
        info!(operation = %operation, entries = ledger.len(), "Description recorded");
    } else {
        warn!(operation = %operation, "Description failed; ledger unchanged");
    }
    Ok(report)
}

/// Select a recorded description. `selector` is a ledger index (negative
/// counts from the end); empty means the latest.
pub fn hotload(ctx: &GenerationContext, selector: &str) -> Result<LedgerEntry, ForgeError> {
    let selector = selector.trim();
    let index = if selector.is_empty() {
        -1
    } else {
        selector.parse::<i64>().map_err(|_| {
            ForgeError::GenerationFailed(format!("Hotload expects an entry index, got '{}'", selector))
        })?
    };
    ctx.description_entry(index)?.ok_or_else(|| {
        ForgeError::GenerationFailed(format!("No description at ledger index {}", index))
    })
}
