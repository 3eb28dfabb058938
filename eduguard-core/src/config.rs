//! Configuration system for Edu-Guard.
//!
//! Uses `figment` for layered configuration: defaults -> config files -> environment -> overrides.
//! Configuration is loaded from `~/.config/eduguard/config.toml` and/or `.eduguard/config.toml`
//! in the workspace directory.

use crate::error::ConfigError;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Top-level configuration for the Edu-Guard service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EduguardConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub moderation: ModerationConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Answering backends, keyed by their `id`.
    #[serde(default = "default_backends")]
    pub backends: Vec<BackendConfig>,
}

impl Default for EduguardConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            moderation: ModerationConfig::default(),
            index: IndexConfig::default(),
            pipeline: PipelineConfig::default(),
            backends: default_backends(),
        }
    }
}

impl EduguardConfig {
    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::NoBackends);
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.trim().is_empty() {
                return Err(ConfigError::MissingField {
                    field: "backends[].id".to_string(),
                });
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(ConfigError::DuplicateBackend {
                    identity: backend.id.clone(),
                });
            }
        }
        if self.index.top_k == 0 {
            return Err(ConfigError::Invalid {
                message: "index.top_k must be at least 1".to_string(),
            });
        }
        if self.index.vector_dimensions == 0 {
            return Err(ConfigError::Invalid {
                message: "index.vector_dimensions must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

fn default_backends() -> Vec<BackendConfig> {
    vec![BackendConfig::default()]
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Which moderation collaborator to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationProvider {
    /// OpenAI moderation endpoint.
    Openai,
    /// Offline term-list matching.
    Keyword,
    /// Every prompt is considered safe. Development only.
    Disabled,
}

/// What a moderation client does when its provider call fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationFallback {
    /// Surface the failure; the pipeline aborts the run.
    #[default]
    Propagate,
    /// Treat the prompt as safe and carry on.
    Allow,
}

/// Configuration for the moderation collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub provider: ModerationProvider,
    /// Name of the variable holding the moderation API key.
    pub api_key_env: String,
    /// Moderation endpoint root; the provider default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Request timeout in seconds.
    pub timeout_secs: u64,
    #[serde(default)]
    pub on_error: ModerationFallback,
    /// Category name -> terms, used by the keyword moderator.
    #[serde(default)]
    pub blocked_terms: BTreeMap<String, Vec<String>>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            provider: ModerationProvider::Openai,
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            timeout_secs: 10,
            on_error: ModerationFallback::Propagate,
            blocked_terms: BTreeMap::new(),
        }
    }
}

/// Configuration for the document index backing retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Directory containing `.txt` documents to index.
    pub data_dir: PathBuf,
    /// Directory where the search index is persisted.
    pub persist_dir: PathBuf,
    /// Length of the hashed term vectors.
    pub vector_dimensions: usize,
    /// Share of the BM25 score in a hit's blended score.
    pub full_text_weight: f32,
    /// Share of the cosine score in a hit's blended score.
    pub vector_weight: f32,
    /// Number of documents joined into the retrieved context.
    pub top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            persist_dir: PathBuf::from(".eduguard/index"),
            vector_dimensions: 128,
            full_text_weight: 0.5,
            vector_weight: 0.5,
            top_k: 3,
        }
    }
}

/// Pipeline orchestration settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for each answering backend call, in seconds. Unbounded when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_timeout_secs: Option<u64>,
}

/// Which answering adapter a backend uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProvider {
    /// OpenAI chat completions and compatible APIs (Together, Ollama, vLLM).
    Openai,
    /// Anthropic Messages API.
    Anthropic,
}

impl std::fmt::Display for BackendProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendProvider::Openai => write!(f, "openai"),
            BackendProvider::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Configuration for one answering backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Caller-chosen identity; keys this backend's entry in the answers map.
    pub id: String,
    pub provider: BackendProvider,
    /// Model identifier (e.g., "gpt-4", "mistralai/Mixtral-8x7B-Instruct-v0.1").
    pub model: String,
    /// Name of the variable holding this backend's key.
    pub api_key_env: String,
    /// API root, e.g. a self-hosted OpenAI-compatible server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Completion length cap.
    pub max_tokens: usize,
    /// Sampling temperature.
    pub temperature: f32,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            id: "openai".to_string(),
            provider: BackendProvider::Openai,
            model: "gpt-4".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: None,
            max_tokens: 1024,
            temperature: 0.7,
        }
    }
}

/// `config.toml` in the platform config dir (`~/.config/eduguard` on Linux).
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "eduguard", "eduguard")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".eduguard").join("config.toml")
}

/// Merge every configuration source into one [`EduguardConfig`].
///
/// Later sources win: built-in defaults, `user_file` (usually
/// [`user_config_path`]; `None` skips the layer), the workspace's
/// `.eduguard/config.toml`, `config_file`, `EDUGUARD_*` variables (`__`
/// separates nesting, as in `EDUGUARD_SERVER__PORT`), then `overrides`.
/// Missing user and workspace files are skipped; a missing `config_file` is
/// an error.
pub fn load_config(
    user_file: Option<&Path>,
    workspace: Option<&Path>,
    config_file: Option<&Path>,
    overrides: Option<&EduguardConfig>,
) -> Result<EduguardConfig, ConfigError> {
    if let Some(path) = config_file
        && !path.exists()
    {
        return Err(ConfigError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let files = present_files(user_file, workspace).chain(config_file.map(Path::to_path_buf));
    let mut figment = files.fold(
        Figment::from(Serialized::defaults(EduguardConfig::default())),
        |figment, path| figment.merge(Toml::file(path)),
    );
    figment = figment.merge(Env::prefixed("EDUGUARD_").split("__"));
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(|e| ConfigError::ParseError {
        message: e.to_string(),
    })
}

/// True when `user_file` or the workspace config file is present.
pub fn config_exists(user_file: Option<&Path>, workspace: Option<&Path>) -> bool {
    present_files(user_file, workspace).next().is_some()
}

fn present_files(
    user_file: Option<&Path>,
    workspace: Option<&Path>,
) -> impl Iterator<Item = PathBuf> {
    [user_file.map(Path::to_path_buf), workspace.map(workspace_config_path)]
        .into_iter()
        .flatten()
        .filter(|path| path.exists())
}

/// Resolve a possibly-relative path against the workspace directory.
pub fn resolve_path(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}
