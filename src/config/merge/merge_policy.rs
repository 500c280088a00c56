//! Layer defaults. Values here mirror the `serde` defaults of each section so
//! that a layer setting one key in a section never blanks its siblings.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with every built-in default applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("system.data_root", "_data")?
        .set_default("system.assets_dir", "assets/generated")?
        .set_default("system.prompts_dir", "prompts")?
        .set_default("system.schemas_dir", "schemas")?
        .set_default("system.saved_configs_dir", "saved_configs")?
        .set_default("dispatch.text", 8)?
        .set_default("dispatch.vision", 8)?
        .set_default("dispatch.image", 6)?
        .set_default("dispatch.audio", 3)?
        .set_default("timeouts.connect_secs", 10)?
        .set_default("timeouts.text_secs", 60)?
        .set_default("timeouts.vision_secs", 90)?
        .set_default("timeouts.image_secs", 300)?
        .set_default("timeouts.audio_secs", 120)?
        .set_default("pipeline.soft_wait_secs", 30)?
        .set_default("merge.analyzed_rule", "structured")?
        .set_default("merge.error_marker", "error")?
        .set_default("merge.data_type_field", "dataType")?
        .set_default("ledger.context_window", 3)
}
