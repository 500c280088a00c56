//! Block regeneration: one pipeline per block combining its asset work with its
//! config section. Partial success is kept; every config section that came
//! back is written into the game's `dsl_config.json`.

use super::visuals::{push_asset_chain, reference_image, AssetRequest, NamedSink};
use super::GenerationContext;
use crate::batch::BatchReport;
use crate::error::ForgeError;
use crate::job::{JobFailure, JobKind, RemoteJob};
use crate::pipeline::{Pipeline, Stage};
use crate::prompts::render;
use crate::provider::{ImageOp, LlmRequest, SoundType};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Player,
    World,
    Object,
}

impl BlockKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BlockKind::Player => "player",
            BlockKind::World => "world",
            BlockKind::Object => "object",
        }
    }

    /// Schema and `dsl_config.json` section of the block's config.
    fn section(self) -> &'static str {
        match self {
            BlockKind::Player => "player",
            BlockKind::World => "world",
            BlockKind::Object => "objects",
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn config_stage_id(kind: BlockKind) -> String {
    format!("{}.config", kind)
}

const SPAWN_STAGE: &str = "object.spawn";

/// Run the block's pipeline and store what succeeded.
///
/// - player: asset chain ‖ player config
/// - world: world config ‖ ground texture ‖ ambient sound
/// - object: asset chain ‖ object config, then spawn config from the object
///   config over a soft-wait edge
pub async fn regenerate_block(
    ctx: &GenerationContext,
    kind: BlockKind,
    content: &str,
    current: Option<&Value>,
) -> Result<BatchReport, ForgeError> {
    let llm = ctx.providers.llm()?;
    let system = ctx.prompts.render("config_system", &[])?;
    let current_text = match current {
        Some(value) => serde_json::to_string_pretty(value)?,
        None => "(none)".to_string(),
    };
    let prompt = ctx.prompts.render(
        "block_prompt",
        &[
            ("block", kind.as_str()),
            ("current", current_text.as_str()),
            ("content", content),
        ],
    )?;

    let mut pipeline = Pipeline::new();
    let mut media_names: HashMap<String, String> = HashMap::new();
    let mut sections: HashMap<String, &'static str> = HashMap::new();

    let config_id = config_stage_id(kind);
    pipeline.push(Stage::new(
        config_id.clone(),
        JobKind::Text,
        llm.job(LlmRequest::structured(
            system.clone(),
            prompt,
            ctx.prompts.schema(kind.section())?,
        )),
    ));
    sections.insert(config_id.clone(), kind.section());

    match kind {
        BlockKind::Player | BlockKind::Object => {
            let images = ctx.providers.images()?;
            let request = AssetRequest {
                name: kind.as_str().to_string(),
                prompt: ctx
                    .prompts
                    .render("asset_prompt", &[("asset", kind.as_str()), ("description", content)])?,
                reference: reference_image(ctx.assets.primary(), kind.as_str()),
            };
            let (final_id, file_name) = push_asset_chain(&mut pipeline, &images, &request, None);
            media_names.insert(final_id, file_name);
        }
        BlockKind::World => {
            let images = ctx.providers.images()?;
            let audio = ctx.providers.audio()?;
            pipeline.push(Stage::new(
                "world.ground",
                JobKind::Image,
                images.job(ImageOp::Generate {
                    prompt: format!("seamless ground texture, {}", content),
                }),
            ));
            media_names.insert("world.ground".to_string(), "ground".to_string());

            let ambient = SoundType::Ambient;
            pipeline.push(Stage::new(
                "world.ambient",
                JobKind::Audio,
                audio.job(format!("{}, {}", ambient.fallback_prompt(), content), ambient),
            ));
            media_names.insert("world.ambient".to_string(), "ambient".to_string());
        }
    }

    if kind == BlockKind::Object {
        let template = ctx.prompts.template("spawn_prompt")?;
        let schema = ctx.prompts.schema("spawn")?;
        let producer = config_id.clone();
        let spawn_llm = Arc::clone(&llm);
        pipeline.push(
            Stage::derived(SPAWN_STAGE, JobKind::Text, move |upstream| {
                let config = upstream
                    .get(&producer)
                    .and_then(|p| p.as_json())
                    .ok_or_else(|| JobFailure::upstream("Object config is not JSON"))?;
                let config = serde_json::to_string_pretty(config)
                    .map_err(|e| JobFailure::internal(e.to_string()))?;
                let prompt = render(template.trim_end(), &[("object_config", config.as_str())]);
                Ok(Arc::new(spawn_llm.job(LlmRequest::structured(system, prompt, schema)))
                    as Arc<dyn RemoteJob>)
            })
            .soft_after(config_id, ctx.soft_wait),
        );
        sections.insert(SPAWN_STAGE.to_string(), "spawn");
    }

    let mut report = ctx.runner.run_pipeline(pipeline).await?;

    let sink = NamedSink {
        assets: &ctx.assets,
        names: &media_names,
    };
    report.persist_matching(&sink, |result| media_names.contains_key(&result.label));

    let mut updates = Map::new();
    for (stage, section) in &sections {
        if let Some(value) = report.by_label(stage).and_then(|r| r.payload()).and_then(|p| p.as_json()) {
            updates.insert(section.to_string(), value.clone());
        }
    }
    if !updates.is_empty() {
        let mut config = match ctx.store.read_config()? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        config.extend(updates);
        ctx.store.write_config(&Value::Object(config))?;
    }

    info!(
        block = %kind,
        succeeded = report.success_count,
        failed = report.failure_count,
        "Block regenerated"
    );
    Ok(report)
}
