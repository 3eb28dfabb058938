//! Error types for the Edu-Guard core library.
//!
//! Uses `thiserror` for public API error types. Collaborator calls fail with
//! [`ServiceError`]; the pipeline classifies those into [`PipelineError`] so the
//! HTTP boundary can tell a rejected prompt apart from an infrastructure failure.

use crate::types::{AnswererId, Stage};
use std::path::PathBuf;

/// Top-level error type for the Edu-Guard core library.
#[derive(Debug, thiserror::Error)]
pub enum EduguardError {
    #[error("Pipeline: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("Service: {0}")]
    Service(#[from] ServiceError),

    #[error("Config: {0}")]
    Config(#[from] ConfigError),

    #[error("Search: {0}")]
    Search(#[from] SearchError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from calls to external collaborators (moderation, index, model APIs).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    #[error("Request to service failed: {message}")]
    ApiRequest { message: String },

    #[error("Unreadable service response: {message}")]
    ResponseParse { message: String },

    #[error("Credentials rejected or missing for {provider}")]
    AuthFailed { provider: String },

    #[error("Throttled by service; retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("No response within {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Could not reach service: {message}")]
    Connection { message: String },

    #[error("Document index failure: {message}")]
    Index { message: String },
}

/// One answerer that failed during the fan-out stage.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendFailure {
    pub identity: AnswererId,
    pub cause: ServiceError,
}

impl std::fmt::Display for BackendFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "backend '{}' failed: {}", self.identity, self.cause)
    }
}

/// Classified outcome of an aborted pipeline run.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("Blocked by guardrails: {reason}")]
    Blocked { reason: String },

    #[error("{stage} stage failed: {source}")]
    StageFailure {
        stage: Stage,
        #[source]
        source: ServiceError,
    },

    #[error("{}", describe_failures(.failures))]
    BackendFailure { failures: Vec<BackendFailure> },
}

impl PipelineError {
    /// Whether the run was rejected by moderation rather than failing.
    pub fn is_blocked(&self) -> bool {
        matches!(self, PipelineError::Blocked { .. })
    }

    /// Identities of the answerers that failed, sorted. Empty for other variants.
    pub fn failed_identities(&self) -> Vec<&AnswererId> {
        match self {
            PipelineError::BackendFailure { failures } => {
                failures.iter().map(|f| &f.identity).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn describe_failures(failures: &[BackendFailure]) -> String {
    match failures {
        [single] => single.to_string(),
        many => {
            let parts: Vec<String> = many.iter().map(|f| f.to_string()).collect();
            format!("{} backends failed: {}", many.len(), parts.join("; "))
        }
    }
}

/// Problems found while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No config file at {path}")]
    FileNotFound { path: PathBuf },

    #[error("Config rejected: {message}")]
    Invalid { message: String },

    #[error("Config field `{field}` is required")]
    MissingField { field: String },

    #[error("Config could not be parsed: {message}")]
    ParseError { message: String },

    #[error("Backend identity '{identity}' is configured more than once")]
    DuplicateBackend { identity: String },

    #[error("At least one answering backend must be configured")]
    NoBackends,
}

/// Failures of the on-disk document index or the corpus walk.
#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("Search index: {0}")]
    IndexError(String),
    #[error("Document corpus: {0}")]
    CorpusError(String),
}

impl From<SearchError> for ServiceError {
    fn from(err: SearchError) -> Self {
        ServiceError::Index {
            message: err.to_string(),
        }
    }
}
