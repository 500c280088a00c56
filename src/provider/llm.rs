//! LLM text / structured-output endpoint.
//!
//! Wire format: `POST {prompt, system_prompt, temperature, response_format?, ...extra}`.
//! The response body is JSON: a string for free text, or the structured document
//! (possibly itself encoded as a JSON string) when a schema was requested.
//! Vision requests send `prompt` as a content-part list with an `image_url` part.

use super::http::{build_http_client, excerpt, post_json, read_json};
use super::schema::StructuredSchema;
use crate::error::ForgeError;
use crate::job::{JobFailure, Outcome, Payload, RemoteJob};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct LlmRequest {
    pub prompt: String,
    pub system_prompt: String,
    pub temperature: f32,
    pub schema: Option<Arc<StructuredSchema>>,
    /// Data URL or remote URL of an image to analyze
    pub image_url: Option<String>,
}

impl LlmRequest {
    pub fn text(system_prompt: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system_prompt: system_prompt.into(),
            temperature: 0.7,
            schema: None,
            image_url: None,
        }
    }

    pub fn structured(
        system_prompt: impl Into<String>,
        prompt: impl Into<String>,
        schema: Arc<StructuredSchema>,
    ) -> Self {
        Self {
            schema: Some(schema),
            ..Self::text(system_prompt, prompt)
        }
    }

    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn body(&self, extra: &Map<String, Value>) -> Value {
        let prompt = match &self.image_url {
            Some(url) => json!([
                {"type": "text", "text": self.prompt},
                {"type": "image_url", "image_url": {"url": url}},
            ]),
            None => Value::String(self.prompt.clone()),
        };
        let mut body = Map::new();
        body.insert("prompt".to_string(), prompt);
        body.insert(
            "system_prompt".to_string(),
            Value::String(self.system_prompt.clone()),
        );
        body.insert("temperature".to_string(), json!(self.temperature));
        if let Some(schema) = &self.schema {
            body.insert("response_format".to_string(), schema.response_format());
        }
        for (key, value) in extra {
            body.entry(key.clone()).or_insert_with(|| value.clone());
        }
        Value::Object(body)
    }
}

pub struct LlmClient {
    http: Client,
    url: String,
    api_key: Option<String>,
    extra: Map<String, Value>,
}

impl LlmClient {
    pub fn new(
        url: impl Into<String>,
        api_key: Option<String>,
        extra: Map<String, Value>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, ForgeError> {
        Ok(Self {
            http: build_http_client(connect_timeout, request_timeout)?,
            url: url.into(),
            api_key,
            extra,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn complete(&self, request: &LlmRequest) -> Result<Payload, JobFailure> {
        let body = request.body(&self.extra);
        let response = post_json(&self.http, &self.url, self.api_key.as_deref(), &body).await?;
        let value = read_json(response).await?;
        interpret(request, value)
    }

    pub fn job(self: &Arc<Self>, request: LlmRequest) -> LlmJob {
        LlmJob {
            client: Arc::clone(self),
            request,
        }
    }
}

/// Turn a parsed response body into a payload according to the request.
fn interpret(request: &LlmRequest, value: Value) -> Result<Payload, JobFailure> {
    let Some(schema) = &request.schema else {
        return Ok(match value {
            Value::String(text) => Payload::Text(text.trim().to_string()),
            other => Payload::Json(other),
        });
    };

    let document = match value {
        Value::String(encoded) => serde_json::from_str(&encoded).map_err(|e| {
            JobFailure::validation(format!(
                "Structured response is not valid JSON: {} ({})",
                e,
                excerpt(&encoded)
            ))
        })?,
        other => other,
    };
    schema.validate(&document).map_err(|e| {
        JobFailure::validation(format!("Response does not match schema '{}': {}", schema.name(), e))
    })?;
    Ok(Payload::Json(document))
}

/// One LLM call as a remote job.
pub struct LlmJob {
    client: Arc<LlmClient>,
    request: LlmRequest,
}

impl LlmJob {
    pub fn request(&self) -> &LlmRequest {
        &self.request
    }
}

#[async_trait]
impl RemoteJob for LlmJob {
    async fn execute(&self) -> Outcome {
        self.client.complete(&self.request).await.into()
    }
}
