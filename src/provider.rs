//! Remote Providers
//!
//! HTTP clients for the generation services and the jobs that wrap them. A
//! [`ProviderProfile`] is built once from configuration and hands out shared,
//! immutable clients; it is passed explicitly to every flow.

use crate::config::{ProvidersConfig, TimeoutConfig};
use crate::error::ForgeError;
use crate::job::JobKind;
use serde_json::Map;
use std::sync::Arc;

pub mod audio;
pub(crate) mod http;
pub mod image;
pub mod llm;
pub mod schema;

pub use audio::{AudioClient, AudioJob, SoundType};
pub use image::{ImageClient, ImageEndpoints, ImageJob, ImageModels, ImageOp};
pub use llm::{LlmClient, LlmJob, LlmRequest};
pub use schema::StructuredSchema;

/// Provider clients resolved from configuration.
///
/// Clients for unset endpoints are absent; asking for one yields a
/// `ProviderError` naming the missing setting.
#[derive(Clone, Default)]
pub struct ProviderProfile {
    llm: Option<Arc<LlmClient>>,
    audio: Option<Arc<AudioClient>>,
    images: Option<Arc<ImageClient>>,
}

impl ProviderProfile {
    pub fn from_config(
        providers: &ProvidersConfig,
        timeouts: &TimeoutConfig,
    ) -> Result<Self, ForgeError> {
        let connect = timeouts.connect();
        let api_key = providers.api_key.clone();

        let llm = match &providers.llm_url {
            Some(url) => {
                let extra: Map<_, _> = providers
                    .llm_extra
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                Some(Arc::new(LlmClient::new(
                    url.clone(),
                    api_key.clone(),
                    extra,
                    connect,
                    // Vision requests share the client; use the longer bound.
                    timeouts
                        .for_kind(JobKind::Text)
                        .max(timeouts.for_kind(JobKind::Vision)),
                )?))
            }
            None => None,
        };

        let audio = match &providers.audio_url {
            Some(url) => Some(Arc::new(AudioClient::new(
                url.clone(),
                api_key.clone(),
                connect,
                timeouts.for_kind(JobKind::Audio),
            )?)),
            None => None,
        };

        let endpoints = ImageEndpoints {
            txt2img: providers.txt2img_url.clone(),
            img2img: providers.img2img_url.clone(),
            rembg: providers.rembg_url.clone(),
            edit: providers.image_edit_url.clone(),
            generate: providers.image_generate_url.clone(),
        };
        let any_image = endpoints.txt2img.is_some()
            || endpoints.img2img.is_some()
            || endpoints.rembg.is_some()
            || endpoints.edit.is_some()
            || endpoints.generate.is_some();
        let images = if any_image {
            let models = ImageModels {
                sd_checkpoint: providers.sd_checkpoint.clone(),
                skybox_checkpoint: providers.skybox_checkpoint.clone(),
                generate_model: providers.image_generate_model.clone(),
            };
            Some(Arc::new(ImageClient::new(
                endpoints,
                models,
                api_key,
                connect,
                timeouts.for_kind(JobKind::Image),
            )?))
        } else {
            None
        };

        Ok(Self { llm, audio, images })
    }

    pub fn with_llm(mut self, client: LlmClient) -> Self {
        self.llm = Some(Arc::new(client));
        self
    }

    pub fn with_audio(mut self, client: AudioClient) -> Self {
        self.audio = Some(Arc::new(client));
        self
    }

    pub fn with_images(mut self, client: ImageClient) -> Self {
        self.images = Some(Arc::new(client));
        self
    }

    pub fn llm(&self) -> Result<Arc<LlmClient>, ForgeError> {
        self.llm
            .clone()
            .ok_or_else(|| missing("llm_url"))
    }

    pub fn audio(&self) -> Result<Arc<AudioClient>, ForgeError> {
        self.audio
            .clone()
            .ok_or_else(|| missing("audio_url"))
    }

    pub fn images(&self) -> Result<Arc<ImageClient>, ForgeError> {
        self.images
            .clone()
            .ok_or_else(|| missing("txt2img_url"))
    }

    /// Names of configured services, for status output.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.llm.is_some() {
            names.push("llm");
        }
        if self.audio.is_some() {
            names.push("audio");
        }
        if self.images.is_some() {
            names.push("image");
        }
        names
    }
}

fn missing(setting: &str) -> ForgeError {
    ForgeError::ProviderError(format!(
        "providers.{} is not configured (set it in config or GAMIFORGE_PROVIDERS__{})",
        setting,
        setting.to_ascii_uppercase()
    ))
}
