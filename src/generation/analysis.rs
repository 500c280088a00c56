//! Vision analysis of persisted image records.
//!
//! Every image record whose content is not an analysis yet (per the merge
//! policy) is analyzed in one batch. Successes replace the content; failures
//! store `{ "<error_marker>": message }` so the record is picked up again on the
//! next run. The state file stays claimed from load to write-back.

use super::GenerationContext;
use crate::batch::BatchReport;
use crate::error::ForgeError;
use crate::job::{FnJob, Job, JobFailure, JobKind, Media, Outcome, Payload};
use crate::merge::{MergePolicy, StateRecord};
use crate::provider::image::{data_url, sniff_image};
use crate::provider::LlmRequest;
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{info, warn};

/// Image records still waiting for an analysis.
pub fn pending_records<'a>(records: &'a [StateRecord], policy: &MergePolicy) -> Vec<(usize, &'a StateRecord)> {
    records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.field_str(&policy.data_type_field) == Some("image"))
        .filter(|(_, r)| !policy.is_analyzed_content(&r.content))
        .collect()
}

/// Image reference the vision endpoint can fetch: the record's `url`, or its
/// `path` (relative paths resolve against `assets_dir`) inlined as a data URL.
fn image_source(record: &StateRecord, assets_dir: &Path) -> Result<String, String> {
    if let Some(url) = record.field_str("url").filter(|u| !u.is_empty()) {
        return Ok(url.to_string());
    }
    let path = record
        .field_str("path")
        .ok_or_else(|| format!("Record '{}' has no url or path", record.id))?;
    let path = if Path::new(path).is_absolute() {
        Path::new(path).to_path_buf()
    } else {
        assets_dir.join(path)
    };
    let bytes = std::fs::read(&path).map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
    let content_type =
        sniff_image(&bytes).ok_or_else(|| format!("{} is not a PNG, JPEG or WEBP image", path.display()))?;
    Ok(data_url(&Media::new(content_type, bytes)))
}

fn error_content(policy: &MergePolicy, message: &str) -> Value {
    let mut map = Map::new();
    map.insert(policy.error_marker.clone(), Value::String(message.to_string()));
    Value::Object(map)
}

pub async fn analyze_state(ctx: &GenerationContext) -> Result<BatchReport, ForgeError> {
    let llm = ctx.providers.llm()?;
    let schema = ctx.prompts.schema("image_analysis")?;
    let system = ctx.prompts.render("analysis_system", &[])?;

    let state = ctx.store.state();
    let mut update = state.begin_update()?;
    let pending = pending_records(&update.document().records, &ctx.merge);
    if pending.is_empty() {
        info!("No image records need analysis");
        return Ok(BatchReport::from_results(Vec::new(), std::time::Duration::ZERO));
    }

    let mut indices = Vec::with_capacity(pending.len());
    let mut jobs = Vec::with_capacity(pending.len());
    for (index, record) in pending {
        indices.push(index);
        let job = match image_source(record, ctx.assets.primary()) {
            Ok(url) => {
                let prompt = ctx.prompts.render("analysis_prompt", &[("record", record.id.as_str())])?;
                let request = LlmRequest::structured(system.clone(), prompt, schema.clone()).with_image(url);
                Job::new(JobKind::Vision, record.id.clone(), llm.job(request))
            }
            Err(message) => Job::new(
                JobKind::Vision,
                record.id.clone(),
                FnJob::new(move || {
                    let message = message.clone();
                    async move { Outcome::failure(JobFailure::validation(message)) }
                }),
            ),
        };
        jobs.push(job);
    }

    let report = ctx.runner.run_batch(jobs).await?;

    let records = &mut update.document_mut().records;
    for (index, result) in indices.into_iter().zip(&report.results) {
        records[index].content = match &result.outcome {
            Outcome::Success {
                payload: Payload::Json(value),
            } => value.clone(),
            Outcome::Success {
                payload: Payload::Text(text),
            } => Value::String(text.clone()),
            Outcome::Success {
                payload: Payload::Media(_),
            } => error_content(&ctx.merge, "Vision endpoint returned media"),
            Outcome::Failure { failure } => {
                warn!(record = %result.label, error = %failure, "Image analysis failed");
                error_content(&ctx.merge, &failure.to_string())
            }
        };
    }
    update.commit()?;

    info!(
        analyzed = report.success_count,
        failed = report.failure_count,
        "State analysis written back"
    );
    Ok(report)
}
