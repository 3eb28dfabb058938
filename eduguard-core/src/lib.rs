//! # Edu-Guard Core
//!
//! Core library for the Edu-Guard API.
//! Provides the request pipeline (moderation, retrieval, multi-model answering),
//! the collaborator contracts and their adapters, configuration, and the HTTP gateway.

pub mod config;
pub mod error;
pub mod factory;
pub mod gateway;
pub mod moderation;
pub mod observer;
pub mod pipeline;
pub mod providers;
pub mod retrieval;
pub mod search;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{EduguardConfig, load_config};
pub use error::{
    BackendFailure, ConfigError, EduguardError, PipelineError, SearchError, ServiceError,
};
pub use factory::{build_pipeline, open_indexer};
pub use moderation::{AllowAllModerator, KeywordModerator, Moderator, OpenAiModerator};
pub use observer::{NoOpObserver, PipelineObserver, RecordingObserver, Transition};
pub use pipeline::{Pipeline, SINGLE_ANSWERER_ID};
pub use providers::{Answerer, MockAnswerer};
pub use retrieval::{DocumentIndexer, IndexStats, Retriever, StaticRetriever};
pub use types::{AnswererId, ModerationVerdict, PipelineResult, RunState, Stage};
