//! Logging
//!
//! `tracing` subscriber setup for the binary. The library only emits events;
//! installing a subscriber is the caller's choice.

use crate::error::ForgeError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::fmt::writer::{BoxMakeWriter, MakeWriterExt};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const ENV_LOG: &str = "GAMIFORGE_LOG";
pub const ENV_LOG_FORMAT: &str = "GAMIFORGE_LOG_FORMAT";
pub const ENV_LOG_OUTPUT: &str = "GAMIFORGE_LOG_OUTPUT";
pub const ENV_LOG_MODULES: &str = "GAMIFORGE_LOG_MODULES";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// trace, debug, info, warn, error, off
    #[serde(default = "default_log_level")]
    pub level: String,

    /// json or text
    #[serde(default = "default_format")]
    pub format: String,

    /// stdout, stderr, file, file+stderr
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_log_file")]
    pub file: PathBuf,

    /// Text format on a terminal stream only
    #[serde(default = "default_true")]
    pub color: bool,

    /// Per-module levels, e.g. `gamiforge::dispatch = "debug"`
    #[serde(default)]
    pub modules: HashMap<String, String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_format() -> String {
    "text".to_string()
}

fn default_output() -> String {
    // stdout carries command output (reports, JSON).
    "stderr".to_string()
}

fn default_log_file() -> PathBuf {
    PathBuf::from("_data/gamiforge.log")
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: default_format(),
            output: default_output(),
            file: default_log_file(),
            color: true,
            modules: HashMap::new(),
        }
    }
}

impl LoggingConfig {
    pub fn validate(&self) -> Result<(), String> {
        parse_format(&self.format)?;
        parse_output(&self.output)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Outputs {
    stdout: bool,
    stderr: bool,
    file: bool,
}

fn parse_format(format: &str) -> Result<LogFormat, String> {
    match format {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => Err(format!(
            "Invalid log format: {} (must be 'json' or 'text')",
            other
        )),
    }
}

fn parse_output(output: &str) -> Result<Outputs, String> {
    let (stdout, stderr, file) = match output {
        "stdout" => (true, false, false),
        "stderr" => (false, true, false),
        "file" => (false, false, true),
        "file+stderr" | "both" => (false, true, true),
        other => {
            return Err(format!(
                "Invalid log output: {} (must be 'stdout', 'stderr', 'file' or 'file+stderr')",
                other
            ))
        }
    };
    Ok(Outputs {
        stdout,
        stderr,
        file,
    })
}

/// Install the global subscriber.
///
/// Precedence, highest first: CLI flags (already folded into `config` by the
/// caller), `GAMIFORGE_LOG*` environment variables, config file, defaults.
pub fn init_logging(config: Option<&LoggingConfig>) -> Result<(), ForgeError> {
    let defaults = LoggingConfig::default();
    let config = config.unwrap_or(&defaults);
    if !config.enabled {
        return Ok(());
    }

    let filter = build_env_filter(config)?;
    let format = match std::env::var(ENV_LOG_FORMAT)
        .ok()
        .and_then(|f| parse_format(&f).ok())
    {
        Some(format) => format,
        None => parse_format(&config.format).map_err(ForgeError::ConfigError)?,
    };
    let outputs = match std::env::var(ENV_LOG_OUTPUT) {
        Ok(output) => parse_output(&output),
        Err(_) => parse_output(&config.output),
    }
    .map_err(ForgeError::ConfigError)?;

    let (writer, terminal) = build_writer(config, outputs)?;
    let ansi = config.color && terminal;

    let installed = match format {
        LogFormat::Json => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_writer(writer),
            )
            .try_init(),
        LogFormat::Text => Registry::default()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_timer(ChronoUtc::rfc_3339())
                    .with_ansi(ansi)
                    .with_writer(writer),
            )
            .try_init(),
    };
    installed.map_err(|e| ForgeError::ConfigError(format!("Failed to install logger: {}", e)))
}

/// Returns the writer and whether it is a pure terminal stream.
fn build_writer(config: &LoggingConfig, outputs: Outputs) -> Result<(BoxMakeWriter, bool), ForgeError> {
    if !outputs.file {
        return Ok(if outputs.stdout {
            (BoxMakeWriter::new(std::io::stdout), true)
        } else {
            (BoxMakeWriter::new(std::io::stderr), true)
        });
    }

    if let Some(parent) = config.file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| {
            ForgeError::ConfigError(format!("Failed to create log directory: {}", e))
        })?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.file)
        .map_err(|e| {
            ForgeError::ConfigError(format!("Failed to open log file {:?}: {}", config.file, e))
        })?;
    let file = Arc::new(file);

    let writer = if outputs.stderr {
        BoxMakeWriter::new(std::io::stderr.and(file))
    } else {
        BoxMakeWriter::new(file)
    };
    Ok((writer, false))
}

fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, ForgeError> {
    if let Ok(filter) = EnvFilter::try_from_env(ENV_LOG) {
        return Ok(filter);
    }
    if config.level == "off" {
        return Ok(EnvFilter::new("off"));
    }

    let mut filter = EnvFilter::new(&config.level);
    let mut directives: Vec<String> = config
        .modules
        .iter()
        .map(|(module, level)| format!("{}={}", module, level))
        .collect();
    if let Ok(modules) = std::env::var(ENV_LOG_MODULES) {
        directives.extend(parse_module_spec(&modules));
    }
    for directive in directives {
        filter = filter.add_directive(directive.parse().map_err(|e| {
            ForgeError::ConfigError(format!("Invalid log directive '{}': {}", directive, e))
        })?);
    }
    Ok(filter)
}

/// `a=debug, b=warn` -> `["a=debug", "b=warn"]`; malformed parts are skipped.
fn parse_module_spec(spec: &str) -> Vec<String> {
    spec.split(',')
        .filter_map(|part| {
            let (module, level) = part.split_once('=')?;
            let (module, level) = (module.trim(), level.trim());
            (!module.is_empty() && !level.is_empty()).then(|| format!("{}={}", module, level))
        })
        .collect()
}
