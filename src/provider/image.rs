//! Image endpoints: txt2img, img2img outpainting, background removal,
//! reference edit and generic generation.
//!
//! Every endpoint answers with base64 image data somewhere in a JSON body. A
//! response only counts as success once that data decodes and starts with a
//! PNG, JPEG or WEBP signature.

use super::http::{build_http_client, post_json, read_json};
use crate::error::ForgeError;
use crate::job::{JobFailure, Media, Outcome, Payload, RemoteJob};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Client;
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_NEGATIVE: &str = "blurry, low quality, distorted, watermark, text";
const SPRITE_NEGATIVE: &str = "background, scenery, extra characters, text, clutter";
const REMBG_MODEL: &str = "isnet-general-use";

/// Endpoint URLs; each operation needs only its own.
#[derive(Debug, Clone, Default)]
pub struct ImageEndpoints {
    pub txt2img: Option<String>,
    pub img2img: Option<String>,
    pub rembg: Option<String>,
    pub edit: Option<String>,
    pub generate: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ImageModels {
    pub sd_checkpoint: Option<String>,
    pub skybox_checkpoint: Option<String>,
    pub generate_model: Option<String>,
}

/// One image operation. Input images are base64 strings.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageOp {
    /// Plain generation; `skybox` selects the panorama checkpoint and size.
    Txt2Img { prompt: String, skybox: bool },
    /// Sprite generation with a negative prompt that discourages backgrounds.
    Sprite { prompt: String },
    RemoveBackground { image: String },
    /// Horizontal outpainting of a skybox base image.
    Outpaint { prompt: String, image: String },
    /// Edit a reference image following `prompt`.
    Edit { prompt: String, image: String },
    /// Generic generation (ground textures).
    Generate { prompt: String },
}

impl ImageOp {
    pub fn name(&self) -> &'static str {
        match self {
            ImageOp::Txt2Img { .. } => "txt2img",
            ImageOp::Sprite { .. } => "sprite",
            ImageOp::RemoveBackground { .. } => "remove_background",
            ImageOp::Outpaint { .. } => "outpaint",
            ImageOp::Edit { .. } => "edit",
            ImageOp::Generate { .. } => "generate",
        }
    }
}

impl fmt::Display for ImageOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Detect the image format from its leading bytes.
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("image/webp")
    } else {
        None
    }
}

/// Decode base64 (optionally a `data:` URL) into validated image media.
pub fn decode_image(encoded: &str) -> Result<Media, JobFailure> {
    let data = match encoded.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => encoded,
    };
    let bytes = STANDARD
        .decode(data.trim())
        .map_err(|e| JobFailure::validation(format!("Invalid base64 image data: {}", e)))?;
    let content_type = sniff_image(&bytes)
        .ok_or_else(|| JobFailure::validation("Response is not a PNG, JPEG or WEBP image"))?;
    Ok(Media::new(content_type, bytes))
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// `data:` URL for a media payload, used for vision requests.
pub fn data_url(media: &Media) -> String {
    format!("data:{};base64,{}", media.content_type, encode_base64(&media.bytes))
}

/// Base64 of an upstream image payload, for chaining operations.
pub fn payload_base64(payload: &Payload) -> Result<String, JobFailure> {
    payload
        .as_media()
        .map(|m| encode_base64(&m.bytes))
        .ok_or_else(|| JobFailure::validation("Upstream payload is not an image"))
}

fn pick<'a>(value: &'a Value, pointer: &str) -> Result<&'a str, JobFailure> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| JobFailure::validation(format!("Response has no image at '{}'", pointer)))
}

pub struct ImageClient {
    http: Client,
    api_key: Option<String>,
    endpoints: ImageEndpoints,
    models: ImageModels,
}

impl ImageClient {
    pub fn new(
        endpoints: ImageEndpoints,
        models: ImageModels,
        api_key: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ForgeError> {
        Ok(Self {
            http: build_http_client(connect_timeout, request_timeout)?,
            api_key,
            endpoints,
            models,
        })
    }

    fn endpoint<'a>(&'a self, url: &'a Option<String>, op: &ImageOp) -> Result<&'a str, JobFailure> {
        url.as_deref()
            .ok_or_else(|| JobFailure::validation(format!("No endpoint configured for {}", op)))
    }

    /// Whether the endpoint `op` needs is configured.
    pub fn supports(&self, op: &ImageOp) -> bool {
        self.url_for(op).is_some()
    }

    fn url_for(&self, op: &ImageOp) -> &Option<String> {
        match op {
            ImageOp::Txt2Img { .. } | ImageOp::Sprite { .. } => &self.endpoints.txt2img,
            ImageOp::Outpaint { .. } => &self.endpoints.img2img,
            ImageOp::RemoveBackground { .. } => &self.endpoints.rembg,
            ImageOp::Edit { .. } => &self.endpoints.edit,
            ImageOp::Generate { .. } => &self.endpoints.generate,
        }
    }

    fn request(&self, op: &ImageOp) -> (Value, &'static str) {
        let sd = self.models.sd_checkpoint.clone().unwrap_or_default();
        let skybox = self.models.skybox_checkpoint.clone().unwrap_or_default();
        match op {
            ImageOp::Txt2Img { prompt, skybox: true } => (
                json!({
                    "prompt": format!("panorama, {}", prompt),
                    "negative_prompt": format!("{}, characters", DEFAULT_NEGATIVE),
                    "steps": 20, "seed": -1, "cfg_scale": 7,
                    "width": 512, "height": 512,
                    "override_settings": {"sd_model_checkpoint": skybox},
                }),
                "/images/0",
            ),
            ImageOp::Txt2Img { prompt, skybox: false } => (
                json!({
                    "prompt": prompt,
                    "negative_prompt": DEFAULT_NEGATIVE,
                    "steps": 20, "seed": -1, "cfg_scale": 7,
                    "width": 1024, "height": 1024,
                    "override_settings": {"sd_model_checkpoint": sd},
                }),
                "/images/0",
            ),
            ImageOp::Sprite { prompt } => (
                json!({
                    "prompt": prompt,
                    "negative_prompt": SPRITE_NEGATIVE,
                    "steps": 20, "seed": -1, "cfg_scale": 7,
                    "width": 1024, "height": 1024,
                    "override_settings": {"sd_model_checkpoint": sd},
                }),
                "/images/0",
            ),
            ImageOp::Outpaint { prompt, image } => (
                json!({
                    "prompt": prompt,
                    "negative_prompt": "",
                    "steps": 20, "seed": -1, "cfg_scale": 7,
                    "width": 512, "height": 512,
                    "init_images": [image],
                    "override_settings": {"sd_model_checkpoint": skybox},
                    "script_name": "poor man's outpainting",
                    "script_args": [128, 4, 0, ["left", "right"]],
                }),
                "/images/0",
            ),
            ImageOp::RemoveBackground { image } => (
                json!({
                    "input_image": image,
                    "model": REMBG_MODEL,
                    "return_mask": false,
                    "alpha_matting": false,
                }),
                "/image",
            ),
            ImageOp::Edit { prompt, image } => (json!({"prompt": prompt, "image": image}), "/image"),
            ImageOp::Generate { prompt } => (
                json!({
                    "model": self.models.generate_model.clone().unwrap_or_default(),
                    "prompt": prompt,
                    "n": 1,
                    "size": "1024x1024",
                }),
                "/data/0/b64_json",
            ),
        }
    }

    pub async fn run(&self, op: &ImageOp) -> Result<Payload, JobFailure> {
        let url = self.endpoint(self.url_for(op), op)?;
        let (body, pointer) = self.request(op);
        let response = post_json(&self.http, url, self.api_key.as_deref(), &body).await?;
        let value = read_json(response).await?;
        let media = decode_image(pick(&value, pointer)?)?;
        Ok(Payload::Media(media))
    }

    pub fn job(self: &Arc<Self>, op: ImageOp) -> ImageJob {
        ImageJob {
            client: Arc::clone(self),
            op,
        }
    }
}

pub struct ImageJob {
    client: Arc<ImageClient>,
    op: ImageOp,
}

#[async_trait]
impl RemoteJob for ImageJob {
    async fn execute(&self) -> Outcome {
        self.client.run(&self.op).await.into()
    }
}
