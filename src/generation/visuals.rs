//! Visual assets: one strict two-stage chain per asset, all chains in a single
//! pipeline.
//!
//! | asset  | with reference       | without reference          |
//! |--------|----------------------|----------------------------|
//! | world  | edit → outpaint      | txt2img (skybox) → outpaint |
//! | others | edit → remove bg     | sprite → remove bg          |
//!
//! Only the final stage of each chain is saved, as `<asset>[_<marker>].png`.

use super::{content_text, GenerationContext};
use crate::batch::{BatchReport, ResultSink};
use crate::error::{ForgeError, StorageError};
use crate::job::{JobFailure, JobKind, JobResult, Payload, RemoteJob};
use crate::merge::StateDocument;
use crate::pipeline::{Pipeline, Stage};
use crate::provider::image::{encode_base64, payload_base64};
use crate::provider::{ImageClient, ImageOp};
use crate::store::{sanitize_name, AssetStore};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub const VISUAL_ASSETS: [&str; 4] = ["player", "world", "platforms", "collectables"];

/// `asset_ref` value meaning "no reference image".
const NO_REFERENCE: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetRequest {
    pub name: String,
    pub prompt: String,
    pub reference: Option<PathBuf>,
}

impl AssetRequest {
    fn is_world(&self) -> bool {
        self.name == "world"
    }
}

/// Assets that need new images according to a game description.
///
/// A structured description flags `player`, `world` and each item of
/// `platforms`/`collectables` with `need_update`; items are named after their
/// `name`. The shared `visual_style` is appended to every asset description.
/// A plain-text description regenerates the four default assets.
pub fn asset_requests(ctx: &GenerationContext, description: &Value) -> Result<Vec<AssetRequest>, ForgeError> {
    let Some(doc) = description.as_object() else {
        let text = content_text(description);
        return VISUAL_ASSETS
            .iter()
            .map(|name| {
                Ok(AssetRequest {
                    name: name.to_string(),
                    prompt: ctx
                        .prompts
                        .render("asset_prompt", &[("asset", name), ("description", text.as_str())])?,
                    reference: reference_image(ctx.assets.primary(), name),
                })
            })
            .collect();
    };

    let style = doc.get("visual_style").and_then(Value::as_str).unwrap_or("");
    let mut flagged: Vec<(String, &Value)> = Vec::new();
    for name in ["player", "world"] {
        if let Some(entry) = doc.get(name).filter(|e| needs_update(e)) {
            flagged.push((name.to_string(), entry));
        }
    }
    for group in ["platforms", "collectables"] {
        let items = doc.get(group).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        for (i, item) in items.iter().enumerate().filter(|(_, item)| needs_update(item)) {
            let name = match item.get("name").and_then(Value::as_str) {
                Some(name) if !name.trim().is_empty() => sanitize_name(name),
                _ => format!("{}_{}", group, i),
            };
            let name = if flagged.iter().any(|(taken, _)| *taken == name) {
                format!("{}_{}", name, i)
            } else {
                name
            };
            flagged.push((name, item));
        }
    }
    if flagged.is_empty() {
        return Ok(Vec::new());
    }

    let state = ctx.store.state().load()?;
    flagged
        .into_iter()
        .map(|(name, entry)| {
            let subject = entry.get("description").and_then(Value::as_str).unwrap_or(&name);
            let subject = if style.is_empty() {
                subject.to_string()
            } else {
                format!("{}; {}", subject, style)
            };
            let reference = match entry.get("asset_ref").and_then(Value::as_str) {
                Some(asset_ref) if !asset_ref.is_empty() && asset_ref != NO_REFERENCE => {
                    Some(resolve_asset_ref(ctx.assets.primary(), &state, asset_ref))
                }
                _ => reference_image(ctx.assets.primary(), &name),
            };
            Ok(AssetRequest {
                prompt: ctx
                    .prompts
                    .render("asset_prompt", &[("asset", name.as_str()), ("description", subject.as_str())])?,
                name,
                reference,
            })
        })
        .collect()
}

fn needs_update(entry: &Value) -> bool {
    entry.get("need_update").and_then(Value::as_bool).unwrap_or(false)
}

/// File behind `asset_ref`: the state record with that id points at it through
/// `fileUrl` (or `url`); otherwise the ref is taken as a file name. Either way
/// it is looked up in `dir` and may not exist.
fn resolve_asset_ref(dir: &Path, state: &StateDocument, asset_ref: &str) -> PathBuf {
    let location = state
        .get(asset_ref)
        .and_then(|record| record.field_str("fileUrl").or_else(|| record.field_str("url")))
        .unwrap_or(asset_ref);
    let file_name = location
        .rsplit(|c: char| c == '/' || c == '\\')
        .find(|segment| !segment.is_empty())
        .unwrap_or(asset_ref);
    dir.join(file_name)
}

pub(crate) fn reference_image(dir: &Path, name: &str) -> Option<PathBuf> {
    let path = dir.join(format!("{}_reference.png", name));
    path.is_file().then_some(path)
}

fn base_stage_id(name: &str) -> String {
    format!("{}.base", name)
}

fn final_stage_id(name: &str) -> String {
    format!("{}.final", name)
}

pub(crate) fn final_file_name(name: &str, marker: Option<&str>) -> String {
    match marker.filter(|m| !m.is_empty()) {
        Some(marker) => format!("{}_{}", name, sanitize_name(marker)),
        None => name.to_string(),
    }
}

/// Pipeline plus the file name each final stage is saved under.
pub(crate) fn visual_pipeline(
    images: &Arc<ImageClient>,
    requests: &[AssetRequest],
    marker: Option<&str>,
) -> (Pipeline, HashMap<String, String>) {
    let mut pipeline = Pipeline::new();
    let mut finals = HashMap::new();
    for request in requests {
        let (final_id, file_name) = push_asset_chain(&mut pipeline, images, request, marker);
        finals.insert(final_id, file_name);
    }
    (pipeline, finals)
}

/// Append the two stages for `request`; returns the final stage id and the
/// file name it is saved under.
///
/// An unreadable reference image fails the base stage with a validation error,
/// so only this chain is lost.
pub(crate) fn push_asset_chain(
    pipeline: &mut Pipeline,
    images: &Arc<ImageClient>,
    request: &AssetRequest,
    marker: Option<&str>,
) -> (String, String) {
    let base_id = base_stage_id(&request.name);
    let base_op = match &request.reference {
        Some(path) => match std::fs::read(path) {
            Ok(bytes) => Some(ImageOp::Edit {
                prompt: request.prompt.clone(),
                image: encode_base64(&bytes),
            }),
            Err(e) => {
                let reason = format!("Cannot read reference image {}: {}", path.display(), e);
                warn!(asset = %request.name, "{}", reason);
                pipeline.push(Stage::derived(base_id.clone(), JobKind::Image, move |_| {
                    Err(JobFailure::validation(reason))
                }));
                None
            }
        },
        None if request.is_world() => Some(ImageOp::Txt2Img {
            prompt: request.prompt.clone(),
            skybox: true,
        }),
        None => Some(ImageOp::Sprite {
            prompt: request.prompt.clone(),
        }),
    };
    if let Some(op) = base_op {
        pipeline.push(Stage::new(base_id.clone(), JobKind::Image, images.job(op)));
    }

    let client = Arc::clone(images);
    let producer = base_id.clone();
    let world = request.is_world();
    let prompt = request.prompt.clone();
    let final_id = final_stage_id(&request.name);
    pipeline.push(
        Stage::derived(final_id.clone(), JobKind::Image, move |upstream| {
            let image = upstream
                .get(&producer)
                .ok_or_else(|| JobFailure::upstream(format!("No output from '{}'", producer)))
                .and_then(payload_base64)?;
            let op = if world {
                ImageOp::Outpaint { prompt, image }
            } else {
                ImageOp::RemoveBackground { image }
            };
            Ok(Arc::new(client.job(op)) as Arc<dyn RemoteJob>)
        })
        .after(base_id),
    );
    (final_id, final_file_name(&request.name, marker))
}

/// Saves results under fixed names, keyed by stage label.
pub(crate) struct NamedSink<'a> {
    pub(crate) assets: &'a AssetStore,
    pub(crate) names: &'a HashMap<String, String>,
}

impl ResultSink for NamedSink<'_> {
    fn persist(&self, result: &JobResult, payload: &Payload) -> Result<PathBuf, StorageError> {
        let name = self
            .names
            .get(&result.label)
            .ok_or_else(|| StorageError::InvalidPath(format!("No asset name for '{}'", result.label)))?;
        self.assets.save(name, payload)
    }
}

pub async fn generate_visuals(
    ctx: &GenerationContext,
    requests: &[AssetRequest],
    marker: Option<&str>,
) -> Result<BatchReport, ForgeError> {
    let images = ctx.providers.images()?;
    let (pipeline, finals) = visual_pipeline(&images, requests, marker);
    let mut report = ctx.runner.run_pipeline(pipeline).await?;

    let sink = NamedSink {
        assets: &ctx.assets,
        names: &finals,
    };
    report.persist_matching(&sink, |result| finals.contains_key(&result.label));
    info!(
        assets = requests.len(),
        saved = report.persisted.len(),
        "Visual generation finished"
    );
    Ok(report)
}
