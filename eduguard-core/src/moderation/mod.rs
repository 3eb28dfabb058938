//! Moderation: deciding whether a prompt may be processed at all.
//!
//! The pipeline only sees the [`Moderator`] trait. Implementations:
//! - [`OpenAiModerator`] calls the OpenAI moderation endpoint
//! - [`KeywordModerator`] matches configured term lists offline
//! - [`AllowAllModerator`] accepts everything (explicitly selected, development only)
//!
//! Use [`create_moderator`] to build the one named by configuration.

mod keyword;
mod openai;

pub use keyword::KeywordModerator;
pub use openai::OpenAiModerator;

use crate::config::{ModerationConfig, ModerationProvider};
use crate::error::{EduguardError, ServiceError};
use crate::types::ModerationVerdict;
use async_trait::async_trait;
use std::sync::Arc;

/// Produces a safety verdict for a piece of text.
///
/// How an implementation reacts to its own provider failing is its policy:
/// it may return an error (the pipeline aborts the run) or a fallback verdict.
#[async_trait]
pub trait Moderator: Send + Sync {
    async fn moderate(&self, text: &str) -> Result<ModerationVerdict, ServiceError>;
}

/// Moderator that considers every text safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllModerator;

#[async_trait]
impl Moderator for AllowAllModerator {
    async fn moderate(&self, _text: &str) -> Result<ModerationVerdict, ServiceError> {
        Ok(ModerationVerdict::safe())
    }
}

/// Build the moderator selected by `config.provider`.
pub fn create_moderator(config: &ModerationConfig) -> Result<Arc<dyn Moderator>, EduguardError> {
    match config.provider {
        ModerationProvider::Openai => Ok(Arc::new(OpenAiModerator::new(config)?)),
        ModerationProvider::Keyword => Ok(Arc::new(KeywordModerator::from_config(config)?)),
        ModerationProvider::Disabled => {
            tracing::warn!("Moderation is disabled; every prompt will be accepted");
            Ok(Arc::new(AllowAllModerator))
        }
    }
}
