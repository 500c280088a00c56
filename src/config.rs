//! Configuration System
//!
//! Layered configuration: built-in defaults, the global user file, workspace
//! files, then `GAMIFORGE_*` environment variables. See [`ConfigLoader`].

use crate::dispatch::DispatchConfig;
use crate::job::JobKind;
use crate::logging::LoggingConfig;
use crate::merge::MergePolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForgeConfig {
    #[serde(default)]
    pub system: SystemConfig,

    /// Per-kind concurrency caps
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Incremental merge policy for persisted state
    #[serde(default)]
    pub merge: MergePolicy,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub providers: ProvidersConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Per-game state, ledgers and assembled configs live under `<data_root>/<game>/`
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,

    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,

    /// Extra directories every saved asset is copied into
    #[serde(default)]
    pub asset_mirrors: Vec<PathBuf>,

    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,

    #[serde(default = "default_schemas_dir")]
    pub schemas_dir: PathBuf,

    /// Named game configs shared by every game (`config save|list|load`)
    #[serde(default = "default_saved_configs_dir")]
    pub saved_configs_dir: PathBuf,
}

fn default_data_root() -> PathBuf {
    PathBuf::from("_data")
}

fn default_assets_dir() -> PathBuf {
    PathBuf::from("assets/generated")
}

fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}

fn default_schemas_dir() -> PathBuf {
    PathBuf::from("schemas")
}

fn default_saved_configs_dir() -> PathBuf {
    PathBuf::from("saved_configs")
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            data_root: default_data_root(),
            assets_dir: default_assets_dir(),
            asset_mirrors: Vec::new(),
            prompts_dir: default_prompts_dir(),
            schemas_dir: default_schemas_dir(),
            saved_configs_dir: default_saved_configs_dir(),
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.data_root.as_os_str().is_empty() {
            return Err("Data root cannot be empty".to_string());
        }
        if self.assets_dir.as_os_str().is_empty() {
            return Err("Assets directory cannot be empty".to_string());
        }
        if self.saved_configs_dir.as_os_str().is_empty() {
            return Err("Saved configs directory cannot be empty".to_string());
        }
        if self.asset_mirrors.iter().any(|m| m == &self.assets_dir) {
            return Err("Asset mirror duplicates the primary assets directory".to_string());
        }
        Ok(())
    }
}

/// Per-kind job timeouts (seconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,
    #[serde(default = "default_text_secs")]
    pub text_secs: u64,
    #[serde(default = "default_vision_secs")]
    pub vision_secs: u64,
    #[serde(default = "default_image_secs")]
    pub image_secs: u64,
    #[serde(default = "default_audio_secs")]
    pub audio_secs: u64,
}

fn default_connect_secs() -> u64 {
    10
}

fn default_text_secs() -> u64 {
    60
}

fn default_vision_secs() -> u64 {
    90
}

fn default_image_secs() -> u64 {
    300
}

fn default_audio_secs() -> u64 {
    120
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            text_secs: default_text_secs(),
            vision_secs: default_vision_secs(),
            image_secs: default_image_secs(),
            audio_secs: default_audio_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn for_kind(&self, kind: JobKind) -> Duration {
        let secs = match kind {
            JobKind::Text => self.text_secs,
            JobKind::Vision => self.vision_secs,
            JobKind::Image => self.image_secs,
            JobKind::Audio => self.audio_secs,
        };
        Duration::from_secs(secs)
    }

    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        for kind in JobKind::ALL {
            if self.for_kind(kind).is_zero() {
                return Err(format!("Timeout for '{}' must be at least 1 second", kind));
            }
        }
        if self.connect_secs == 0 {
            return Err("Connect timeout must be at least 1 second".to_string());
        }
        Ok(())
    }
}

/// Pipeline and batch bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Bound for soft-wait edges
    #[serde(default = "default_soft_wait_secs")]
    pub soft_wait_secs: u64,

    /// Optional overall deadline per batch or pipeline run
    #[serde(default)]
    pub batch_deadline_secs: Option<u64>,
}

fn default_soft_wait_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            soft_wait_secs: default_soft_wait_secs(),
            batch_deadline_secs: None,
        }
    }
}

impl PipelineConfig {
    pub fn soft_wait(&self) -> Duration {
        Duration::from_secs(self.soft_wait_secs)
    }

    pub fn batch_deadline(&self) -> Option<Duration> {
        self.batch_deadline_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Number of most recent entries included in follow-up prompts
    #[serde(default = "default_context_window")]
    pub context_window: usize,
}

fn default_context_window() -> usize {
    3
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
        }
    }
}

/// Remote endpoints. Unset endpoints disable the flows that need them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    /// LLM text/structured-output endpoint
    #[serde(default)]
    pub llm_url: Option<String>,

    /// Sent as a bearer token to every endpoint when set
    #[serde(default)]
    pub api_key: Option<String>,

    /// Merged into every LLM request body (deployment, api version, ...)
    #[serde(default)]
    pub llm_extra: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub audio_url: Option<String>,

    #[serde(default)]
    pub txt2img_url: Option<String>,

    #[serde(default)]
    pub img2img_url: Option<String>,

    #[serde(default)]
    pub rembg_url: Option<String>,

    #[serde(default)]
    pub image_edit_url: Option<String>,

    #[serde(default)]
    pub image_generate_url: Option<String>,

    #[serde(default)]
    pub sd_checkpoint: Option<String>,

    #[serde(default)]
    pub skybox_checkpoint: Option<String>,

    #[serde(default)]
    pub image_generate_model: Option<String>,
}

impl ProvidersConfig {
    fn endpoints(&self) -> [(&'static str, &Option<String>); 7] {
        [
            ("llm_url", &self.llm_url),
            ("audio_url", &self.audio_url),
            ("txt2img_url", &self.txt2img_url),
            ("img2img_url", &self.img2img_url),
            ("rembg_url", &self.rembg_url),
            ("image_edit_url", &self.image_edit_url),
            ("image_generate_url", &self.image_generate_url),
        ]
    }

    pub fn validate(&self) -> Vec<(String, String)> {
        self.endpoints()
            .into_iter()
            .filter_map(|(name, url)| {
                let url = url.as_deref()?;
                if url.trim().is_empty() {
                    Some((name.to_string(), "URL cannot be empty".to_string()))
                } else if !(url.starts_with("http://") || url.starts_with("https://")) {
                    Some((
                        name.to_string(),
                        format!("URL must start with http:// or https:// (got '{}')", url),
                    ))
                } else {
                    None
                }
            })
            .collect()
    }
}

/// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    System(String),
    Dispatch(String),
    Timeouts(String),
    Provider(String, String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::System(msg) => write!(f, "System: {}", msg),
            ValidationError::Dispatch(msg) => write!(f, "Dispatch: {}", msg),
            ValidationError::Timeouts(msg) => write!(f, "Timeouts: {}", msg),
            ValidationError::Provider(name, msg) => write!(f, "Provider '{}': {}", name, msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ForgeConfig {
    /// Validate every section, collecting all problems.
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.system.validate() {
            errors.push(ValidationError::System(e));
        }
        if let Err(e) = self.dispatch.validate() {
            errors.push(ValidationError::Dispatch(e));
        }
        if let Err(e) = self.timeouts.validate() {
            errors.push(ValidationError::Timeouts(e));
        }
        for (name, msg) in self.providers.validate() {
            errors.push(ValidationError::Provider(name, msg));
        }
        if let Err(e) = self.logging.validate() {
            errors.push(ValidationError::Logging(e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
