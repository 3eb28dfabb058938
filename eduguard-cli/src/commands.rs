//! CLI subcommand handlers.

use crate::Commands;
use crate::ConfigAction;
use eduguard_core::config::{EduguardConfig, config_exists, load_config, user_config_path};
use eduguard_core::{PipelineError, build_pipeline, open_indexer};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Exit code used when a prompt is rejected by moderation.
const EXIT_BLOCKED: u8 = 2;

/// Config files named on the command line, on top of the workspace file.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// `--config`
    pub file: Option<PathBuf>,
    /// `--no-user-config`
    pub skip_user: bool,
}

impl ConfigSources {
    fn user_file(&self) -> Option<PathBuf> {
        if self.skip_user {
            None
        } else {
            user_config_path()
        }
    }
}

/// Handle a CLI subcommand.
pub async fn handle_command(
    command: Commands,
    workspace: &Path,
    sources: &ConfigSources,
) -> anyhow::Result<ExitCode> {
    match command {
        Commands::Serve { host, port } => {
            handle_serve(workspace, sources, host, port).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Ask { prompt } => handle_ask(&prompt, workspace, sources).await,
        Commands::Index { rebuild } => {
            handle_index(rebuild, workspace, sources).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => {
            handle_config(action, workspace, sources)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load(workspace: &Path, sources: &ConfigSources) -> anyhow::Result<EduguardConfig> {
    let user_file = sources.user_file();
    if sources.file.is_none() && !config_exists(user_file.as_deref(), Some(workspace)) {
        tracing::warn!("No config file found; using defaults. Run `eduguard config init` to create one.");
    }
    load_config(
        user_file.as_deref(),
        Some(workspace),
        sources.file.as_deref(),
        None,
    )
    .map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
}

async fn handle_serve(
    workspace: &Path,
    sources: &ConfigSources,
    host: Option<String>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let mut config = load(workspace, sources)?;
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let pipeline = build_pipeline(&config, workspace)?;
    eduguard_core::gateway::serve(&config.server, Arc::new(pipeline)).await?;
    Ok(())
}

async fn handle_ask(
    prompt: &str,
    workspace: &Path,
    sources: &ConfigSources,
) -> anyhow::Result<ExitCode> {
    let config = load(workspace, sources)?;
    let pipeline = build_pipeline(&config, workspace)?;

    match pipeline.process(prompt).await {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(e @ PipelineError::Blocked { .. }) => {
            eprintln!("{}", e);
            Ok(ExitCode::from(EXIT_BLOCKED))
        }
        Err(e) => Err(anyhow::anyhow!("Unexpected error: {}", e)),
    }
}

async fn handle_index(
    rebuild: bool,
    workspace: &Path,
    sources: &ConfigSources,
) -> anyhow::Result<()> {
    let config = load(workspace, sources)?;
    config.validate()?;

    let workspace = workspace.to_path_buf();
    let (count, stats) = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
        let (indexer, stats) = open_indexer(&config.index, &workspace)?;
        let stats = if rebuild && stats.loaded_existing {
            indexer.rebuild()?
        } else {
            stats
        };
        Ok((indexer.document_count()?, stats))
    })
    .await??;

    if stats.loaded_existing {
        println!("Index already built: {} documents", count);
    } else {
        println!(
            "Indexed {} documents ({} skipped)",
            stats.files_indexed, stats.files_skipped
        );
    }
    Ok(())
}

fn handle_config(
    action: ConfigAction,
    workspace: &Path,
    sources: &ConfigSources,
) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_dir = workspace.join(".eduguard");
            std::fs::create_dir_all(&config_dir)?;

            let config_path = config_dir.join("config.toml");
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let default_config = EduguardConfig::default();
            let toml_str = toml::to_string_pretty(&default_config)?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load(workspace, sources)?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// Workspace-only config: the developer's own user file must not leak in.
    fn isolated() -> ConfigSources {
        ConfigSources {
            file: None,
            skip_user: true,
        }
    }

    fn write_offline_config(workspace: &Path) {
        let config_dir = workspace.join(".eduguard");
        std::fs::create_dir_all(&config_dir).unwrap();
        let body = r#"
[moderation]
provider = "keyword"

[moderation.blocked_terms]
violence = ["attack"]

[[backends]]
id = "local"
provider = "openai"
model = "llama3"
api_key_env = "EDUGUARD_TEST_UNSET_CLI_KEY"
base_url = "http://127.0.0.1:9/v1"
max_tokens = 64
temperature = 0.0
"#;
        std::fs::write(config_dir.join("config.toml"), body).unwrap();
    }

    #[tokio::test]
    async fn test_config_init_creates_file() {
        let dir = TempDir::new().unwrap();
        let command = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(command, dir.path(), &isolated()).await.unwrap();
        assert!(dir.path().join(".eduguard/config.toml").exists());
    }

    #[tokio::test]
    async fn test_config_show_after_init() {
        let dir = TempDir::new().unwrap();
        let workspace = dir.path();

        let init_cmd = Commands::Config {
            action: ConfigAction::Init,
        };
        handle_command(init_cmd, workspace, &isolated()).await.unwrap();

        let show_cmd = Commands::Config {
            action: ConfigAction::Show,
        };
        assert!(handle_command(show_cmd, workspace, &isolated()).await.is_ok());
    }

    #[tokio::test]
    async fn test_config_show_missing_explicit_file_fails() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.toml");
        let command = Commands::Config {
            action: ConfigAction::Show,
        };
        let sources = ConfigSources {
            file: Some(missing),
            skip_user: true,
        };
        assert!(handle_command(command, dir.path(), &sources).await.is_err());
    }

    #[test]
    fn test_skip_user_drops_user_layer() {
        assert_eq!(isolated().user_file(), None);
        assert_eq!(ConfigSources::default().user_file(), user_config_path());
    }

    #[test]
    fn test_load_explicit_file_over_workspace() {
        let dir = TempDir::new().unwrap();
        write_offline_config(dir.path());
        let explicit = dir.path().join("override.toml");
        std::fs::write(&explicit, "[server]\nport = 8456\n").unwrap();

        let sources = ConfigSources {
            file: Some(explicit),
            skip_user: true,
        };
        let config = load(dir.path(), &sources).unwrap();
        assert_eq!(config.server.port, 8456);
        assert_eq!(config.backends[0].id, "local");
    }

    #[tokio::test]
    async fn test_index_then_rebuild() {
        let dir = TempDir::new().unwrap();
        write_offline_config(dir.path());
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/a.txt"), "Photosynthesis uses light.").unwrap();

        let command = Commands::Index { rebuild: false };
        handle_command(command, dir.path(), &isolated()).await.unwrap();

        std::fs::write(dir.path().join("data/b.txt"), "Mitochondria make energy.").unwrap();
        let command = Commands::Index { rebuild: true };
        handle_command(command, dir.path(), &isolated()).await.unwrap();

        let config = load(dir.path(), &isolated()).unwrap();
        let (indexer, stats) = open_indexer(&config.index, dir.path()).unwrap();
        assert!(stats.loaded_existing);
        assert_eq!(indexer.document_count().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_rebuild_while_a_pipeline_holds_the_index() {
        let dir = TempDir::new().unwrap();
        write_offline_config(dir.path());
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(dir.path().join("data/a.txt"), "Photosynthesis uses light.").unwrap();

        let config = load(dir.path(), &isolated()).unwrap();
        let serving = build_pipeline(&config, dir.path()).unwrap();

        let command = Commands::Index { rebuild: true };
        handle_command(command, dir.path(), &isolated()).await.unwrap();
        let command = Commands::Ask {
            prompt: "plan an attack".into(),
        };
        let code = handle_command(command, dir.path(), &isolated()).await.unwrap();
        assert_eq!(code, ExitCode::from(EXIT_BLOCKED));
        drop(serving);
    }

    #[tokio::test]
    async fn test_ask_blocked_prompt_exits_with_blocked_code() {
        let dir = TempDir::new().unwrap();
        write_offline_config(dir.path());

        let command = Commands::Ask {
            prompt: "plan an attack".into(),
        };
        let code = handle_command(command, dir.path(), &isolated()).await.unwrap();
        assert_eq!(code, ExitCode::from(EXIT_BLOCKED));
    }

    #[tokio::test]
    async fn test_ask_unreachable_backend_is_error() {
        let dir = TempDir::new().unwrap();
        write_offline_config(dir.path());

        let command = Commands::Ask {
            prompt: "What is photosynthesis?".into(),
        };
        let err = handle_command(command, dir.path(), &isolated())
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Unexpected error:"));
    }
}
