//! OpenAI-compatible answering backend.
//!
//! Supports OpenAI, Together, Ollama, vLLM, LM Studio, and any endpoint
//! that follows the OpenAI chat completions API format.

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

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Answerer backed by `POST {base_url}/chat/completions`.
pub struct OpenAiCompatibleAnswerer {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: usize,
    temperature: f32,
}

impl std::fmt::Debug for OpenAiCompatibleAnswerer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatibleAnswerer")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiCompatibleAnswerer {
    /// Create an answerer with an already-resolved API key.
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
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": build_user_message(prompt, context) },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "stream": false,
        })
    }

    /// Normalize a chat completion body into the answer text.
    ///
    /// Accepts `message.content` as a string or as a list of content parts,
    /// and the legacy completions shape `choices[0].text`.
    fn parse_response(body: &Value) -> Result<String, ServiceError> {
        let choice = body
            .get("choices")
            .and_then(|c| c.get(0))
            .ok_or_else(|| ServiceError::ResponseParse {
                message: "No choices in response".to_string(),
            })?;

        if let Some(content) = choice.get("message").and_then(|m| m.get("content")) {
            match content {
                Value::String(text) => return Ok(text.clone()),
                Value::Array(parts) => {
                    let text: String = parts
                        .iter()
                        .filter_map(|part| match part {
                            Value::String(s) => Some(s.as_str()),
                            other => other.get("text").and_then(Value::as_str),
                        })
                        .collect();
                    return Ok(text);
                }
                Value::Null => {}
                other => {
                    return Err(ServiceError::ResponseParse {
                        message: format!("Unexpected message content: {}", other),
                    });
                }
            }
        }

        if let Some(text) = choice.get("text").and_then(Value::as_str) {
            return Ok(text.to_string());
        }

        Err(ServiceError::ResponseParse {
            message: "No text content in choice".to_string(),
        })
    }
}

#[async_trait]
impl Answerer for OpenAiCompatibleAnswerer {
    async fn ask(&self, prompt: &str, context: &str) -> Result<String, ServiceError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(url = %url, model = %self.model, "Sending chat completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
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
            return Err(map_http_error("OpenAI-compatible", status, retry_after, &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| ServiceError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;
        Self::parse_response(&json)
    }
}
