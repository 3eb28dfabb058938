//! Assembling a [`Pipeline`] from configuration.
//!
//! This is the only place collaborators are constructed; the pipeline itself
//! receives them fully built.

use crate::config::{EduguardConfig, IndexConfig, resolve_path};
use crate::error::EduguardError;
use crate::moderation::create_moderator;
use crate::pipeline::Pipeline;
use crate::providers::{Answerer, create_answerer};
use crate::retrieval::{DocumentIndexer, IndexStats};
use crate::types::AnswererId;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Open (or build) the document index, with paths resolved against `workspace`.
pub fn open_indexer(
    config: &IndexConfig,
    workspace: &Path,
) -> Result<(DocumentIndexer, IndexStats), EduguardError> {
    let resolved = IndexConfig {
        data_dir: resolve_path(workspace, &config.data_dir),
        persist_dir: resolve_path(workspace, &config.persist_dir),
        ..config.clone()
    };
    Ok(DocumentIndexer::build_or_load(&resolved)?)
}

/// Build the pipeline described by `config`.
///
/// Validates the configuration, then constructs the moderator, the retriever
/// and one answerer per configured backend.
pub fn build_pipeline(config: &EduguardConfig, workspace: &Path) -> Result<Pipeline, EduguardError> {
    config.validate()?;

    let moderator = create_moderator(&config.moderation)?;

    let (indexer, stats) = open_indexer(&config.index, workspace)?;
    info!(
        files_indexed = stats.files_indexed,
        files_skipped = stats.files_skipped,
        loaded_existing = stats.loaded_existing,
        "Document index ready"
    );

    let mut answerers: Vec<(AnswererId, Arc<dyn Answerer>)> = Vec::new();
    for backend in &config.backends {
        let answerer = create_answerer(backend)?;
        info!(
            backend = %backend.id,
            provider = %backend.provider,
            model = %backend.model,
            "Answering backend configured"
        );
        answerers.push((AnswererId::new(backend.id.clone()), answerer));
    }

    let mut pipeline = Pipeline::new(moderator, Arc::new(indexer), answerers)?;
    if let Some(secs) = config.pipeline.answer_timeout_secs {
        pipeline = pipeline.with_answer_timeout(Duration::from_secs(secs));
    }
    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BackendConfig, ModerationConfig, ModerationProvider};
    use crate::error::ConfigError;
    use std::fs;

    fn offline_config() -> EduguardConfig {
        EduguardConfig {
            moderation: ModerationConfig {
                provider: ModerationProvider::Disabled,
                ..ModerationConfig::default()
            },
            backends: vec![
                BackendConfig {
                    id: "local-a".into(),
                    api_key_env: "EDUGUARD_TEST_UNSET_FACTORY_A".into(),
                    base_url: Some("http://localhost:11434/v1".into()),
                    ..BackendConfig::default()
                },
                BackendConfig {
                    id: "local-b".into(),
                    api_key_env: "EDUGUARD_TEST_UNSET_FACTORY_B".into(),
                    base_url: Some("http://127.0.0.1:8080/v1".into()),
                    ..BackendConfig::default()
                },
            ],
            ..EduguardConfig::default()
        }
    }

    #[test]
    fn test_build_pipeline_offline() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/python.txt"), "Python is a language.").unwrap();

        let mut config = offline_config();
        config.pipeline.answer_timeout_secs = Some(30);

        let pipeline = build_pipeline(&config, dir.path()).unwrap();
        let ids: Vec<&str> = pipeline.identities().iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["local-a", "local-b"]);
        assert_eq!(pipeline.answer_timeout(), Some(Duration::from_secs(30)));
        assert!(dir.path().join(".eduguard/index").exists());
    }

    #[test]
    fn test_two_pipelines_share_a_workspace() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("data")).unwrap();
        fs::write(dir.path().join("data/python.txt"), "Python is a language.").unwrap();
        let config = offline_config();

        let first = build_pipeline(&config, dir.path()).unwrap();
        let second = build_pipeline(&config, dir.path()).unwrap();
        assert_eq!(first.identities(), second.identities());

        let (indexer, stats) = open_indexer(&config.index, dir.path()).unwrap();
        assert!(stats.loaded_existing);
        assert_eq!(indexer.rebuild().unwrap().files_indexed, 1);
    }

    #[test]
    fn test_build_pipeline_rejects_duplicate_backends() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = offline_config();
        config.backends[1].id = "local-a".into();

        assert!(matches!(
            build_pipeline(&config, dir.path()),
            Err(EduguardError::Config(ConfigError::DuplicateBackend { .. }))
        ));
    }

    #[test]
    fn test_build_pipeline_missing_backend_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = offline_config();
        config.backends.push(BackendConfig {
            id: "remote".into(),
            api_key_env: "EDUGUARD_TEST_UNSET_FACTORY_REMOTE".into(),
            ..BackendConfig::default()
        });

        assert!(matches!(
            build_pipeline(&config, dir.path()),
            Err(EduguardError::Service(_))
        ));
    }
}
