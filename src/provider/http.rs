//! Shared HTTP plumbing: client construction and failure classification.

use crate::error::ForgeError;
use crate::job::JobFailure;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::time::Duration;

/// Longest response excerpt carried in a failure message.
const BODY_EXCERPT: usize = 300;

pub(crate) fn build_http_client(connect: Duration, request: Duration) -> Result<Client, ForgeError> {
    Client::builder()
        .connect_timeout(connect)
        .timeout(request)
        .build()
        .map_err(|e| ForgeError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

/// Network-level error to a typed failure.
pub(crate) fn map_send_error(error: reqwest::Error) -> JobFailure {
    if error.is_timeout() {
        JobFailure::timeout(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        JobFailure::transport(format!("Connection error: {}", error))
    } else if error.is_decode() || error.is_body() {
        JobFailure::transport(format!("Failed to read response: {}", error))
    } else {
        JobFailure::transport(format!("HTTP error: {}", error))
    }
}

/// 408, 429 and 5xx are retryable transport failures; any other non-2xx is a
/// rejected request.
pub(crate) fn map_status(status: StatusCode, body: &str) -> JobFailure {
    let message = format!("Request failed with status {}: {}", status, excerpt(body));
    if status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
    {
        JobFailure::transport(message)
    } else {
        JobFailure::validation(message)
    }
}

pub(crate) fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(BODY_EXCERPT) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

pub(crate) fn with_auth(builder: RequestBuilder, api_key: Option<&str>) -> RequestBuilder {
    match api_key {
        Some(key) => builder.bearer_auth(key),
        None => builder,
    }
}

/// POST a JSON body and return the response once its status is a success.
pub(crate) async fn post_json(
    client: &Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
) -> Result<Response, JobFailure> {
    let response = with_auth(client.post(url), api_key)
        .json(body)
        .send()
        .await
        .map_err(map_send_error)?;
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(map_status(status, &text));
    }
    Ok(response)
}

/// Parse a successful response body as JSON; empty and malformed bodies fail validation.
pub(crate) async fn read_json(response: Response) -> Result<Value, JobFailure> {
    let text = response.text().await.map_err(map_send_error)?;
    if text.trim().is_empty() {
        return Err(JobFailure::validation("Empty response body"));
    }
    serde_json::from_str(&text).map_err(|e| {
        JobFailure::validation(format!("Malformed JSON response: {} ({})", e, excerpt(&text)))
    })
}
