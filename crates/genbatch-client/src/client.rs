//! HTTP image generation client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use genbatch_models::{
    GeneratedImage, GenerationOperation, GenerationRequest, OperationError, OperationResult,
};

use crate::config::ClientConfig;
use crate::error::ClientResult;

/// Error code the generation service uses when it throttles a caller.
pub const RATE_LIMIT_CODE: &str = "rate_limit_exceeded";

/// Generation client.
pub struct HttpGenerationClient {
    config: ClientConfig,
    client: Client,
}

/// Request body sent to the generation endpoint.
#[derive(Debug, Serialize)]
struct GenerationBody<'a> {
    prompt: &'a str,
    size: &'a str,
    quality: &'a str,
    style: &'a str,
}

/// Response body returned by the generation endpoint.
#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    success: bool,
    #[serde(rename = "imageUrl")]
    image_url: Option<String>,
    #[serde(rename = "revisedPrompt")]
    revised_prompt: Option<String>,
    /// Either a plain message or an `{ code, message }` object.
    error: Option<Value>,
}

impl HttpGenerationClient {
    /// Create a new generation client.
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        let client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self { config, client })
    }

    /// Create from environment variables.
    pub fn from_env() -> ClientResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn transport_error(&self, err: reqwest::Error) -> OperationError {
        if err.is_timeout() {
            OperationError::timed_out(self.config.request_timeout)
        } else {
            OperationError::terminal(format!("Request failed: {}", err))
        }
    }
}

#[async_trait]
impl GenerationOperation for HttpGenerationClient {
    type Payload = GenerationRequest;
    type Output = GeneratedImage;

    fn name(&self) -> &'static str {
        "image_generation"
    }

    async fn execute(&self, request: &GenerationRequest) -> OperationResult<GeneratedImage> {
        debug!("Generating image for {}", request.file_path);

        let body = GenerationBody {
            prompt: &request.prompt,
            size: &request.size,
            quality: &request.quality,
            style: &request.style,
        };

        let mut builder = self.client.post(self.config.endpoint.clone()).json(&body);
        if let Some(api_key) = &self.config.api_key {
            builder = builder.bearer_auth(api_key);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await.map_err(|e| self.transport_error(e))?;

        let parsed: Option<GenerationResponse> = serde_json::from_str(&text).ok();
        let error_message = parsed
            .as_ref()
            .and_then(|r| r.error.as_ref())
            .map(describe_error);

        if status == StatusCode::TOO_MANY_REQUESTS {
            let message = error_message.unwrap_or_else(|| RATE_LIMIT_CODE.to_string());
            warn!("Generation rate limited for {}: {}", request.file_path, message);
            return Err(OperationError::RateLimited {
                message,
                retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
            });
        }

        if !status.is_success() {
            let message = error_message.unwrap_or_else(|| format!("HTTP {}: {}", status, text.trim()));
            return Err(classify_message(message, retry_after));
        }

        match parsed {
            Some(GenerationResponse {
                success: true,
                image_url: Some(image_url),
                revised_prompt,
                ..
            }) => {
                info!("Generated image for {}", request.file_path);
                Ok(GeneratedImage {
                    image_url,
                    file_name: request.download_file_name().to_string(),
                    revised_prompt,
                })
            }
            Some(_) => Err(classify_message(
                error_message.unwrap_or_else(|| "Failed to generate image".to_string()),
                retry_after,
            )),
            None => Err(OperationError::terminal(format!(
                "Invalid response body: {}",
                text.chars().take(200).collect::<String>()
            ))),
        }
    }
}

/// Render the service's `error` field as a single message.
fn describe_error(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            let code = map.get("code").and_then(Value::as_str);
            let message = map.get("message").and_then(Value::as_str);
            match (code, message) {
                (Some(code), Some(message)) => format!("{}: {}", code, message),
                (Some(code), None) => code.to_string(),
                (None, Some(message)) => message.to_string(),
                (None, None) => error.to_string(),
            }
        }
        other => other.to_string(),
    }
}

fn classify_message(message: String, retry_after: Option<Duration>) -> OperationError {
    if message.contains(RATE_LIMIT_CODE) {
        OperationError::RateLimited {
            message,
            retry_after_ms: retry_after.map(|d| d.as_millis() as u64),
        }
    } else {
        OperationError::terminal(message)
    }
}

/// Parse a `Retry-After` header given in whole seconds.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
