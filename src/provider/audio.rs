//! Text-to-audio endpoint.
//!
//! `POST {prompt, length, steps}` (values sent as strings). Success requires an
//! `audio/wav` content type and a body starting with the `RIFF` container tag.

use super::http::{build_http_client, excerpt, post_json};
use crate::error::ForgeError;
use crate::job::{JobFailure, Media, Outcome, Payload, RemoteJob};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DIFFUSION_STEPS: u32 = 25;
const WAV_SIGNATURE: &[u8] = b"RIFF";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SoundType {
    Ambient,
    Jump,
    Collision,
    Pickup,
    Other(String),
}

impl SoundType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "AMBIENT" => SoundType::Ambient,
            "JUMP" => SoundType::Jump,
            "COLLISION" => SoundType::Collision,
            "PICKUP" => SoundType::Pickup,
            other => SoundType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SoundType::Ambient => "AMBIENT",
            SoundType::Jump => "JUMP",
            SoundType::Collision => "COLLISION",
            SoundType::Pickup => "PICKUP",
            SoundType::Other(name) => name,
        }
    }

    /// Clip length in seconds.
    pub fn length_secs(&self) -> u32 {
        match self {
            SoundType::Ambient => 6,
            SoundType::Jump | SoundType::Collision | SoundType::Pickup => 1,
            SoundType::Other(_) => 2,
        }
    }

    /// Prompt used when prompt derivation fails.
    pub fn fallback_prompt(&self) -> String {
        format!("{} sound effect", self.as_str().to_ascii_lowercase())
    }
}

impl fmt::Display for SoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct AudioClient {
    http: Client,
    url: String,
    api_key: Option<String>,
}

impl AudioClient {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ForgeError> {
        Ok(Self {
            http: build_http_client(connect_timeout, request_timeout)?,
            url: url.into(),
            api_key,
        })
    }

    pub async fn generate(&self, prompt: &str, sound: &SoundType) -> Result<Payload, JobFailure> {
        let body = json!({
            "prompt": prompt,
            "length": sound.length_secs().to_string(),
            "steps": DIFFUSION_STEPS.to_string(),
        });
        let response = post_json(&self.http, &self.url, self.api_key.as_deref(), &body).await?;

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.to_ascii_lowercase().contains("audio/wav") {
            let text = response.text().await.unwrap_or_default();
            return Err(JobFailure::validation(format!(
                "Expected audio/wav, got '{}': {}",
                content_type,
                excerpt(&text)
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(super::http::map_send_error)?;
        if !bytes.starts_with(WAV_SIGNATURE) {
            return Err(JobFailure::validation("Invalid WAV header (missing RIFF)"));
        }
        Ok(Payload::Media(Media::new("audio/wav", bytes.to_vec())))
    }

    pub fn job(self: &Arc<Self>, prompt: impl Into<String>, sound: SoundType) -> AudioJob {
        AudioJob {
            client: Arc::clone(self),
            prompt: prompt.into(),
            sound,
        }
    }
}

pub struct AudioJob {
    client: Arc<AudioClient>,
    prompt: String,
    sound: SoundType,
}

#[async_trait]
impl RemoteJob for AudioJob {
    async fn execute(&self) -> Outcome {
        self.client.generate(&self.prompt, &self.sound).await.into()
    }
}
