//! OpenAI moderation endpoint client.

use super::Moderator;
use crate::config::{ModerationConfig, ModerationFallback};
use crate::error::ServiceError;
use crate::providers::{map_http_error, map_transport_error, retry_after_secs};
use crate::types::ModerationVerdict;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Reason attached to the verdict when [`ModerationFallback::Allow`] swallows a failure.
pub const FALLBACK_REASON: &str = "Moderation API error";

/// Moderator backed by `POST {base_url}/moderations`.
pub struct OpenAiModerator {
    client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    fallback: ModerationFallback,
}

impl std::fmt::Debug for OpenAiModerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiModerator")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("fallback", &self.fallback)
            .finish()
    }
}

impl OpenAiModerator {
    /// Create a moderator from configuration.
    ///
    /// Reads the API key from the environment variable named by `config.api_key_env`.
    pub fn new(config: &ModerationConfig) -> Result<Self, ServiceError> {
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| ServiceError::AuthFailed {
                provider: format!("OpenAI moderation: env var '{}' not set", config.api_key_env),
            })?;
        Self::new_with_key(config, api_key)
    }

    /// Create a moderator with an explicitly provided API key.
    pub fn new_with_key(config: &ModerationConfig, api_key: String) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::Connection {
                message: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            timeout_secs: config.timeout_secs,
            fallback: config.on_error,
        })
    }

    /// Parse a moderation response body into a verdict.
    ///
    /// The reason lists every category flagged `true`, or `"flagged"` when none are.
    fn parse_response(body: &Value) -> Result<ModerationVerdict, ServiceError> {
        let result = body
            .get("results")
            .and_then(|r| r.get(0))
            .ok_or_else(|| ServiceError::ResponseParse {
                message: "No results in moderation response".to_string(),
            })?;

        let flagged = result
            .get("flagged")
            .and_then(Value::as_bool)
            .ok_or_else(|| ServiceError::ResponseParse {
                message: "Missing 'flagged' in moderation result".to_string(),
            })?;

        if !flagged {
            return Ok(ModerationVerdict::safe());
        }

        let categories: Vec<&str> = result
            .get("categories")
            .and_then(Value::as_object)
            .map(|cats| {
                cats.iter()
                    .filter(|(_, v)| v.as_bool() == Some(true))
                    .map(|(k, _)| k.as_str())
                    .collect()
            })
            .unwrap_or_default();

        let reason = if categories.is_empty() {
            "flagged".to_string()
        } else {
            categories.join(", ")
        };
        Ok(ModerationVerdict::unsafe_because(reason))
    }

    async fn request(&self, text: &str) -> Result<ModerationVerdict, ServiceError> {
        let url = format!("{}/moderations", self.base_url);
        debug!(url = %url, "Sending moderation request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&json!({ "input": text }))
            .send()
            .await
            .map_err(|e| map_transport_error(e, Some(self.timeout_secs)))?;

        let status = response.status();
        let retry_after = retry_after_secs(response.headers());
        let body = response
            .text()
            .await
            .map_err(|e| map_transport_error(e, Some(self.timeout_secs)))?;

        if !status.is_success() {
            return Err(map_http_error("OpenAI moderation", status, retry_after, &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| ServiceError::ResponseParse {
            message: format!("Invalid JSON: {}", e),
        })?;
        Self::parse_response(&json)
    }

    /// Apply the configured fallback policy to a failed provider call.
    fn apply_fallback(
        &self,
        outcome: Result<ModerationVerdict, ServiceError>,
    ) -> Result<ModerationVerdict, ServiceError> {
        match (outcome, self.fallback) {
            (Ok(verdict), _) => Ok(verdict),
            (Err(e), ModerationFallback::Propagate) => Err(e),
            (Err(e), ModerationFallback::Allow) => {
                warn!(error = %e, "Moderation provider failed; allowing prompt per fallback policy");
                Ok(ModerationVerdict {
                    is_safe: true,
                    reason: FALLBACK_REASON.to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl Moderator for OpenAiModerator {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, ServiceError> {
        let outcome = self.request(text).await;
        self.apply_fallback(outcome)
    }
}
