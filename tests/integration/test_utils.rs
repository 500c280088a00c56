//! Shared test utilities for integration tests
//!
//! Environment isolation for config tests, fixture bytes, instrumented fake
//! jobs and a generation context wired to a mock server.

use async_trait::async_trait;
use gamiforge::config::{ForgeConfig, ProvidersConfig};
use gamiforge::dispatch::DispatchConfig;
use gamiforge::generation::GenerationContext;
use gamiforge::job::{JobFailure, Outcome, Payload, RemoteJob};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Smallest byte strings that pass the media signature checks.
pub const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDRfake";
pub const WAV_BYTES: &[u8] = b"RIFF\x24\0\0\0WAVEfmt fake";

pub fn png_base64() -> String {
    gamiforge::provider::image::encode_base64(PNG_BYTES)
}

/// Global mutex to serialize environment variable access across all tests
static ENV_MUTEX: Mutex<()> = Mutex::new(());

const ISOLATED_VARS: &[&str] = &[
    "HOME",
    "XDG_CONFIG_HOME",
    "GAMIFORGE_ENV",
    "GAMIFORGE_DISPATCH__AUDIO",
    "GAMIFORGE_PIPELINE__SOFT_WAIT_SECS",
    "GAMIFORGE_PROVIDERS__LLM_URL",
];

/// Run `f` with HOME and XDG_CONFIG_HOME inside `test_dir` and every
/// GAMIFORGE_* variable the tests touch cleared; restores the environment after.
pub fn with_isolated_env<F, R>(test_dir: &TempDir, f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(&str, Option<String>)> = ISOLATED_VARS
        .iter()
        .map(|name| (*name, std::env::var(name).ok()))
        .collect();

    let home = test_dir.path().join("home");
    let config_home = test_dir.path().join("xdg");
    std::fs::create_dir_all(&home).unwrap();
    std::fs::create_dir_all(&config_home).unwrap();
    for name in ISOLATED_VARS {
        std::env::remove_var(name);
    }
    std::env::set_var("HOME", &home);
    std::env::set_var("XDG_CONFIG_HOME", &config_home);

    let result = f();

    for (name, value) in saved {
        match value {
            Some(value) => std::env::set_var(name, value),
            None => std::env::remove_var(name),
        }
    }
    result
}

/// Every provider endpoint pointed at `base` (a mock server URI).
pub fn mock_providers(base: &str) -> ProvidersConfig {
    ProvidersConfig {
        llm_url: Some(format!("{}/llm", base)),
        audio_url: Some(format!("{}/audio", base)),
        txt2img_url: Some(format!("{}/txt2img", base)),
        img2img_url: Some(format!("{}/img2img", base)),
        rembg_url: Some(format!("{}/rembg", base)),
        image_edit_url: Some(format!("{}/edit", base)),
        image_generate_url: Some(format!("{}/generate", base)),
        ..ProvidersConfig::default()
    }
}

/// Context for game "test" with all data under `workspace`.
pub fn generation_context(workspace: &TempDir, base: &str, dispatch: DispatchConfig) -> GenerationContext {
    let config = ForgeConfig {
        dispatch,
        providers: mock_providers(base),
        ..ForgeConfig::default()
    };
    GenerationContext::from_config(&config, workspace.path(), "test").unwrap()
}

/// Fake job recording current and peak concurrency.
#[derive(Clone, Default)]
pub struct Gauge {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl Gauge {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn job(&self, delay: Duration, outcome: Outcome) -> GaugedJob {
        GaugedJob {
            gauge: self.clone(),
            delay,
            outcome,
        }
    }

    pub fn ok_job(&self, delay: Duration, text: &str) -> GaugedJob {
        self.job(delay, Outcome::success(Payload::Text(text.to_string())))
    }

    pub fn failing_job(&self, delay: Duration, failure: JobFailure) -> GaugedJob {
        self.job(delay, Outcome::failure(failure))
    }
}

pub struct GaugedJob {
    gauge: Gauge,
    delay: Duration,
    outcome: Outcome,
}

#[async_trait]
impl RemoteJob for GaugedJob {
    async fn execute(&self) -> Outcome {
        self.gauge.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.gauge.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.gauge.current.fetch_sub(1, Ordering::SeqCst);
        self.outcome.clone()
    }
}
