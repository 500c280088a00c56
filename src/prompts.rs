//! Prompt templates and response schemas.
//!
//! Templates are plain text with `__KEY__` placeholders. A file in the
//! configured prompts directory overrides the embedded default of the same
//! name; schemas work the same way and are normalized once, on first use.

use crate::error::ForgeError;
use crate::provider::StructuredSchema;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Default templates embedded at compile time
const BUILTIN_PROMPTS: &[(&str, &str)] = &[
    ("sound_system", include_str!("../prompts/sound_system.md")),
    ("sound_prompt", include_str!("../prompts/sound_prompt.md")),
    ("description_system", include_str!("../prompts/description_system.md")),
    ("description_prompt", include_str!("../prompts/description_prompt.md")),
    ("config_system", include_str!("../prompts/config_system.md")),
    ("config_section", include_str!("../prompts/config_section.md")),
    ("spawn_prompt", include_str!("../prompts/spawn_prompt.md")),
    ("asset_prompt", include_str!("../prompts/asset_prompt.md")),
    ("block_prompt", include_str!("../prompts/block_prompt.md")),
    ("analysis_system", include_str!("../prompts/analysis_system.md")),
    ("analysis_prompt", include_str!("../prompts/analysis_prompt.md")),
    ("theme_system", include_str!("../prompts/theme_system.md")),
    ("theme_prompt", include_str!("../prompts/theme_prompt.md")),
    ("chat_image", include_str!("../prompts/chat_image.md")),
];

const BUILTIN_SCHEMAS: &[(&str, &str)] = &[
    ("player", include_str!("../schemas/player.json")),
    ("world", include_str!("../schemas/world.json")),
    ("objects", include_str!("../schemas/objects.json")),
    ("spawn", include_str!("../schemas/spawn.json")),
    ("image_analysis", include_str!("../schemas/image_analysis.json")),
    ("game_description", include_str!("../schemas/game_description.json")),
];

/// Replace every `__KEY__` with its value. Keys are matched upper-cased;
/// unknown placeholders are left as they are.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |text, (key, value)| {
        text.replace(&format!("__{}__", key.to_ascii_uppercase()), value)
    })
}

pub struct PromptLibrary {
    prompts_dir: PathBuf,
    schemas_dir: PathBuf,
    schemas: Mutex<HashMap<String, Arc<StructuredSchema>>>,
}

impl PromptLibrary {
    pub fn new(prompts_dir: impl Into<PathBuf>, schemas_dir: impl Into<PathBuf>) -> Self {
        Self {
            prompts_dir: prompts_dir.into(),
            schemas_dir: schemas_dir.into(),
            schemas: Mutex::new(HashMap::new()),
        }
    }

    /// Library using only the embedded defaults.
    pub fn builtin() -> Self {
        Self::new(PathBuf::new(), PathBuf::new())
    }

    pub fn prompts_dir(&self) -> &Path {
        &self.prompts_dir
    }

    pub fn template(&self, name: &str) -> Result<String, ForgeError> {
        if !self.prompts_dir.as_os_str().is_empty() {
            let path = self.prompts_dir.join(format!("{}.md", name));
            if path.is_file() {
                return std::fs::read_to_string(&path).map_err(|e| {
                    ForgeError::ConfigError(format!("Failed to read prompt {}: {}", path.display(), e))
                });
            }
        }
        BUILTIN_PROMPTS
            .iter()
            .find(|(builtin, _)| *builtin == name)
            .map(|(_, text)| text.to_string())
            .ok_or_else(|| ForgeError::ConfigError(format!("Unknown prompt template '{}'", name)))
    }

    pub fn render(&self, name: &str, vars: &[(&str, &str)]) -> Result<String, ForgeError> {
        Ok(render(self.template(name)?.trim_end(), vars))
    }

    pub fn schema(&self, name: &str) -> Result<Arc<StructuredSchema>, ForgeError> {
        if let Some(schema) = self.schemas.lock().get(name) {
            return Ok(Arc::clone(schema));
        }

        let on_disk = self.schemas_dir.join(format!("{}.json", name));
        let schema = if !self.schemas_dir.as_os_str().is_empty() && on_disk.is_file() {
            StructuredSchema::load(&self.schemas_dir, name)?
        } else {
            let raw = BUILTIN_SCHEMAS
                .iter()
                .find(|(builtin, _)| *builtin == name)
                .map(|(_, text)| *text)
                .ok_or_else(|| ForgeError::ConfigError(format!("Unknown schema '{}'", name)))?;
            let value: Value = serde_json::from_str(raw)?;
            StructuredSchema::new(name, &value)
        };

        let schema = Arc::new(schema);
        self.schemas
            .lock()
            .insert(name.to_string(), Arc::clone(&schema));
        Ok(schema)
    }
}
