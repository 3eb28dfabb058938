//! Answering backends.
//!
//! Defines the [`Answerer`] trait the pipeline fans out to, plus one explicit
//! adapter per backend API:
//! - OpenAI-compatible chat completions (OpenAI, Together, Ollama, vLLM)
//! - Anthropic Messages API
//!
//! Each adapter normalizes its API's response shape into a single plain string.
//! Use [`create_answerer`] to instantiate the adapter named by a [`BackendConfig`].

pub mod anthropic;
pub mod mock;
pub mod openai_compat;

pub use anthropic::AnthropicAnswerer;
pub use mock::MockAnswerer;
pub use openai_compat::OpenAiCompatibleAnswerer;

use crate::config::{BackendConfig, BackendProvider};
use crate::error::ServiceError;
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::sync::Arc;
use tracing::debug;

/// Instruction sent ahead of every question.
pub const SYSTEM_PROMPT: &str = "You are a helpful educational assistant. \
     Answer the question clearly and accurately. \
     When context is provided, ground your answer in it.";

/// Answers a prompt, optionally grounded in retrieved context, via an external model.
#[async_trait]
pub trait Answerer: Send + Sync {
    /// Ask the model. An empty `context` means no context is available and is not an error.
    async fn ask(&self, prompt: &str, context: &str) -> Result<String, ServiceError>;
}

/// Build the user turn for a (prompt, context) pair.
///
/// Context is included only when it has non-whitespace content.
pub fn build_user_message(prompt: &str, context: &str) -> String {
    if context.trim().is_empty() {
        format!("Question: {}", prompt)
    } else {
        format!("Context:\n{}\n\nQuestion: {}", context.trim(), prompt)
    }
}

/// Resolve a backend's API key from the environment.
///
/// Local endpoints (localhost / 127.0.0.1) don't require a key; a placeholder is used.
pub fn resolve_api_key(config: &BackendConfig) -> Result<String, ServiceError> {
    if let Ok(key) = std::env::var(&config.api_key_env)
        && !key.is_empty()
    {
        return Ok(key);
    }

    let is_local = config
        .base_url
        .as_deref()
        .is_some_and(|u| u.contains("localhost") || u.contains("127.0.0.1"));
    if is_local {
        debug!(backend = %config.id, "No API key set for local backend; using placeholder");
        return Ok("local".to_string());
    }

    Err(ServiceError::AuthFailed {
        provider: format!(
            "{} (backend '{}'): env var '{}' not set",
            config.provider, config.id, config.api_key_env
        ),
    })
}

/// Create the answering adapter for a backend configuration.
pub fn create_answerer(config: &BackendConfig) -> Result<Arc<dyn Answerer>, ServiceError> {
    let api_key = resolve_api_key(config)?;
    match config.provider {
        BackendProvider::Openai => Ok(Arc::new(OpenAiCompatibleAnswerer::new(config, api_key)?)),
        BackendProvider::Anthropic => Ok(Arc::new(AnthropicAnswerer::new(config, api_key)?)),
    }
}

/// Extract a `Retry-After` value given in whole seconds.
pub(crate) fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
}

/// Map a non-success HTTP status to a `ServiceError`.
pub(crate) fn map_http_error(
    provider: &str,
    status: StatusCode,
    retry_after: Option<u64>,
    body: &str,
) -> ServiceError {
    match status.as_u16() {
        401 | 403 => {
            debug!(body = %body, status = status.as_u16(), "Authentication failed");
            ServiceError::AuthFailed {
                provider: provider.to_string(),
            }
        }
        429 => ServiceError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(5),
        },
        code if code >= 500 => ServiceError::ApiRequest {
            message: format!("{} server error ({}): {}", provider, status, body),
        },
        _ => ServiceError::ApiRequest {
            message: format!("{} HTTP {}: {}", provider, status, body),
        },
    }
}

/// Map a reqwest transport failure to a `ServiceError`.
/// `client_timeout_secs` is the bound set on the reqwest client, if any.
/// Without one a timeout is reported as a plain request failure.
pub(crate) fn map_transport_error(
    err: reqwest::Error,
    client_timeout_secs: Option<u64>,
) -> ServiceError {
    match client_timeout_secs {
        Some(timeout_secs) if err.is_timeout() => ServiceError::Timeout { timeout_secs },
        _ if err.is_connect() => ServiceError::Connection {
            message: err.to_string(),
        },
        _ => ServiceError::ApiRequest {
            message: format!("Request failed: {}", err),
        },
    }
}
