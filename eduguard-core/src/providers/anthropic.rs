//! Anthropic Messages API answering backend.
//!
//! Key differences from OpenAI-compatible APIs:
//! - Auth via `x-api-key` header (not `Authorization: Bearer`)
//! - Required `anthropic-version` header
//! - System instruction is a top-level `system` field, not in the messages array
//! - The reply is a list of typed content blocks

use super::{
    Answerer, SYSTEM_PROMPT, build_user_message, map_http_error, map_transport_error,
    retry_after_secs,
};
use crate::config::BackendConfig;
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// The default Anthropic API base URL.
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// The required Anthropic API version header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Answerer backed by `POST {base_url}/messages`.
pub struct AnthropicAnswerer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl std::fmt::Debug for AnthropicAnswerer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicAnswerer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl AnthropicAnswerer {
    pub fn new(config: &BackendConfig, api_key: String) -> Result<Self, ServiceError> {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: Client::new(),
            base_url,
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
        })
    }

    fn request_body(&self, prompt: &str, context: &str) -> Value {
        json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "system": SYSTEM_PROMPT,
            "messages": [
                { "role": "user", "content": build_user_message(prompt, context) },
            ],
        })
    }

    /// Concatenate the `text` blocks of a Messages API response.
    ///
    /// Non-text blocks (e.g. `tool_use`) are skipped. A response with no text
    /// blocks at all is a parse error.
    fn parse_content_blocks(body: &Value) -> Result<String, ServiceError> {
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| ServiceError::ResponseParse {
                message: "Missing 'content' array in response".to_string(),
            })?;

        let texts: Vec<&str> = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();

        if texts.is_empty() {
            return Err(ServiceError::ResponseParse {
                message: "No text blocks in response".to_string(),
            });
        }
        Ok(texts.concat())
    }
}

#[async_trait]
impl Answerer for AnthropicAnswerer {
    async fn ask(&self, prompt: &str, context: &str) -> Result<String, ServiceError> {
        let url = format!("{}/messages", self.base_url);
        debug!(url = %url, model = %self.model, "Sending Anthropic messages request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&self.request_body(prompt, context))
            .send()
            .await
            .map_err(|e| map_transport_error(e, None))?;

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, None))?;

        if !status.is_success() {
            return Err(map_http_error("Anthropic", status, retry_after, &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| ServiceError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;
        Self::parse_content_blocks(&json)
    }
}
