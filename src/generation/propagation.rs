//! Change propagation and cohesive chat.
//!
//! When one block of a game changes, or the user asks for a new theme in chat,
//! the model proposes one matching description for every block of the game
//! mechanism plus a narrative and a transition sentence. A failed call yields a
//! fixed fallback theme so callers always get every field.

use super::GenerationContext;
use crate::batch::BatchReport;
use crate::error::{ForgeError, StorageError};
use crate::job::{JobFailure, JobKind, Media, RemoteJob};
use crate::pipeline::{Pipeline, Stage};
use crate::prompts::render;
use crate::provider::image::{data_url, sniff_image};
use crate::provider::{LlmClient, LlmRequest, StructuredSchema};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const IMAGE_STAGE: &str = "chat.image";
const THEME_STAGE: &str = "theme";
const PROPAGATION_TEMPERATURE: f32 = 0.7;
const CHAT_TEMPERATURE: f32 = 0.8;

/// Rules of a game mechanism: what the game is about, its object slots and
/// a narrative template using `##slot` markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MechanismConfig {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub objects: BTreeMap<String, String>,
    #[serde(default)]
    pub narrative: String,
}

impl MechanismConfig {
    /// Dodge the falling hazards, catch the falling rewards.
    pub fn dodge_and_catch() -> Self {
        Self {
            description: "Player must dodge falling hazards and catch falling collectibles".to_string(),
            objects: BTreeMap::from([
                ("box1".to_string(), "a hazard that the player must avoid".to_string()),
                (
                    "box2".to_string(),
                    "a collectible that the player will catch to get rewards.".to_string(),
                ),
            ]),
            narrative: "##player is in ##world. Avoid ##box1 and get those ##box2!".to_string(),
        }
    }

    /// Response schema: one string per block plus narrative and transition.
    fn theme_schema(&self) -> StructuredSchema {
        let mut properties = Map::new();
        let keys = ["player", "world"]
            .into_iter()
            .chain(self.objects.keys().map(String::as_str))
            .chain(["narrative", "transition"]);
        for key in keys {
            properties.insert(key.to_string(), json!({"type": "string"}));
        }
        StructuredSchema::new("block_theme", &json!({"type": "object", "properties": properties}))
    }
}

/// Theme used when the model gives no usable answer. The built-in mechanism
/// gets named placeholders; custom ones get `default <slot>`.
fn fallback_theme(config: Option<&MechanismConfig>) -> Map<String, Value> {
    let mut theme = Map::new();
    theme.insert("player".to_string(), json!("hero"));
    theme.insert("world".to_string(), json!("fantasy world"));
    theme.insert("narrative".to_string(), json!("Error generating suggestions"));
    match config {
        Some(config) => {
            for key in config.objects.keys() {
                theme.insert(key.clone(), Value::String(format!("default {}", key)));
            }
        }
        None => {
            theme.insert("box1".to_string(), json!("obstacle"));
            theme.insert("box2".to_string(), json!("treasure"));
        }
    }
    theme
}

/// One block's content before and after an edit.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockChange {
    pub block: String,
    pub old_content: String,
    pub new_content: String,
}

/// A chat turn asking for a new theme.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub message: String,
    /// Image file the theme should be based on.
    pub image: Option<PathBuf>,
    /// Current per-block descriptions, keyed by block.
    pub current: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThemeSuggestion {
    pub report: BatchReport,
    pub theme: Map<String, Value>,
    /// The theme is the fallback because generation failed.
    pub fallback: bool,
}

impl ThemeSuggestion {
    fn from_report(report: BatchReport, config: Option<&MechanismConfig>) -> Self {
        let generated = report
            .by_label(THEME_STAGE)
            .and_then(|r| r.payload())
            .and_then(|p| p.as_json())
            .and_then(Value::as_object)
            .cloned();
        match generated {
            Some(theme) => Self {
                report,
                theme,
                fallback: false,
            },
            None => {
                warn!("Theme generation failed; using fallback theme");
                Self {
                    report,
                    theme: fallback_theme(config),
                    fallback: true,
                }
            }
        }
    }
}

/// Everything a theme request needs, rendered ahead of the pipeline so a
/// derived stage can finish the prompt from upstream output.
struct ThemePrompt {
    llm: Arc<LlmClient>,
    system: String,
    template: String,
    schema: Arc<StructuredSchema>,
    mechanism: String,
    object_keys: String,
}

impl ThemePrompt {
    fn new(ctx: &GenerationContext, mechanism: &str, config: &MechanismConfig) -> Result<Self, ForgeError> {
        let object_fields = config
            .objects
            .iter()
            .map(|(key, desc)| format!("- {}: one specific {}", key, desc))
            .collect::<Vec<_>>()
            .join("\n");
        let system = ctx.prompts.render(
            "theme_system",
            &[
                ("mechanism", mechanism),
                ("mechanism_description", config.description.as_str()),
                ("object_fields", object_fields.as_str()),
                ("narrative_template", config.narrative.as_str()),
            ],
        )?;
        Ok(Self {
            llm: ctx.providers.llm()?,
            system,
            template: ctx.prompts.template("theme_prompt")?,
            schema: Arc::new(config.theme_schema()),
            mechanism: mechanism.to_string(),
            object_keys: config.objects.keys().cloned().collect::<Vec<_>>().join(", "),
        })
    }

    fn job(self, change: &BlockChange, temperature: f32) -> Arc<dyn RemoteJob> {
        let prompt = render(
            self.template.trim_end(),
            &[
                ("block", change.block.as_str()),
                ("mechanism", self.mechanism.as_str()),
                ("old_content", change.old_content.as_str()),
                ("new_content", change.new_content.as_str()),
                ("object_keys", self.object_keys.as_str()),
            ],
        );
        let request = LlmRequest::structured(self.system, prompt, self.schema).with_temperature(temperature);
        Arc::new(self.llm.job(request))
    }
}

fn require(field: &str, value: &str) -> Result<(), ForgeError> {
    if value.trim().is_empty() {
        return Err(ForgeError::GenerationFailed(format!("Missing required field: {}", field)));
    }
    Ok(())
}

/// Suggest a theme for every block after `change`. `config` defaults to the
/// dodge-and-catch mechanism.
pub async fn propagate_change(
    ctx: &GenerationContext,
    mechanism: &str,
    config: Option<&MechanismConfig>,
    change: &BlockChange,
) -> Result<ThemeSuggestion, ForgeError> {
    require("block", &change.block)?;
    require("new content", &change.new_content)?;
    require("mechanism", mechanism)?;

    let resolved = config.cloned().unwrap_or_else(MechanismConfig::dodge_and_catch);
    let prompt = ThemePrompt::new(ctx, mechanism, &resolved)?;
    let mut pipeline = Pipeline::new();
    pipeline.push(Stage::from_arc(
        THEME_STAGE,
        JobKind::Text,
        prompt.job(change, PROPAGATION_TEMPERATURE),
    ));
    let report = ctx.runner.run_pipeline(pipeline).await?;
    info!(block = %change.block, ok = report.all_succeeded(), "Change propagated");
    Ok(ThemeSuggestion::from_report(report, config))
}

/// Current descriptions as the "old content" of a chat-driven change.
fn current_state(current: &Map<String, Value>, config: &MechanismConfig) -> String {
    let field = |key: &str| {
        current
            .get(key)
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
            .unwrap_or_else(|| "Not set".to_string())
    };
    let mut state = format!(
        "Current game narrative:\nPlayer: {}\nWorld: {}\n",
        field("player"),
        field("world")
    );
    for key in config.objects.keys().filter(|k| current.contains_key(k.as_str())) {
        state.push_str(&format!("{}: {}\n", key, field(key)));
    }
    state
}

fn chat_context(message: &str, image_description: Option<&str>) -> String {
    match (message.trim().is_empty(), image_description) {
        (false, Some(desc)) => format!("{}\n\nImage description: {}", message, desc),
        (true, Some(desc)) => format!("Create a game based on this image: {}", desc),
        (_, None) => message.to_string(),
    }
}

fn image_data_url(path: &Path) -> Result<String, ForgeError> {
    let bytes = std::fs::read(path).map_err(StorageError::from)?;
    let content_type = sniff_image(&bytes).ok_or_else(|| {
        ForgeError::GenerationFailed(format!("{} is not a PNG, JPEG or WEBP image", path.display()))
    })?;
    Ok(data_url(&Media::new(content_type, bytes)))
}

/// Theme the whole game from a chat message and/or an image. The image is
/// described first; the theme stage waits for it.
pub async fn cohesive_chat(
    ctx: &GenerationContext,
    mechanism: &str,
    config: Option<&MechanismConfig>,
    chat: &ChatRequest,
) -> Result<ThemeSuggestion, ForgeError> {
    require("mechanism", mechanism)?;
    if chat.message.trim().is_empty() && chat.image.is_none() {
        return Err(ForgeError::GenerationFailed(
            "Either a message or an image must be provided".to_string(),
        ));
    }

    let resolved = config.cloned().unwrap_or_else(MechanismConfig::dodge_and_catch);
    let prompt = ThemePrompt::new(ctx, mechanism, &resolved)?;
    let old_content = current_state(&chat.current, &resolved);
    let message = chat.message.clone();
    let mut pipeline = Pipeline::new();

    match &chat.image {
        Some(path) => {
            let url = image_data_url(path)?;
            let llm = ctx.providers.llm()?;
            let describe = ctx.prompts.render("chat_image", &[])?;
            pipeline.push(Stage::new(
                IMAGE_STAGE,
                JobKind::Vision,
                llm.job(LlmRequest::text(String::new(), describe).with_image(url)),
            ));
            pipeline.push(
                Stage::derived(THEME_STAGE, JobKind::Text, move |upstream| {
                    let description = upstream
                        .get(IMAGE_STAGE)
                        .and_then(|p| p.as_text())
                        .ok_or_else(|| JobFailure::upstream("Image description is not text"))?;
                    let change = BlockChange {
                        block: "player".to_string(),
                        old_content,
                        new_content: format!("User request: {}", chat_context(&message, Some(description))),
                    };
                    Ok(prompt.job(&change, CHAT_TEMPERATURE))
                })
                .after(IMAGE_STAGE),
            );
        }
        None => {
            let change = BlockChange {
                block: "player".to_string(),
                old_content,
                new_content: format!("User request: {}", chat_context(&message, None)),
            };
            pipeline.push(Stage::from_arc(
                THEME_STAGE,
                JobKind::Text,
                prompt.job(&change, CHAT_TEMPERATURE),
            ));
        }
    }

    let report = ctx.runner.run_pipeline(pipeline).await?;
    info!(
        image = chat.image.is_some(),
        ok = report.all_succeeded(),
        "Cohesive chat finished"
    );
    Ok(ThemeSuggestion::from_report(report, config))
}
