//! Edu-Guard CLI: serve the moderated question-answering API or run it once.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use directories::ProjectDirs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer};

/// Edu-Guard: moderated, context-grounded answers from several language models
#[derive(Parser, Debug)]
#[command(name = "eduguard", version, about, long_about = None)]
struct Cli {
    /// Directory that relative config, data and index paths resolve against
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Explicit config file; must exist when given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ignore the user-level config file
    #[arg(long)]
    no_user_config: bool,

    /// More log output; repeat for trace level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors to the console
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the HTTP API
    Serve {
        /// Host to bind to (overrides server.host)
        #[arg(long)]
        host: Option<String>,
        /// Port to listen on (overrides server.port)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Run the pipeline once and print the result as JSON
    Ask {
        /// The question to ask
        prompt: String,
    },
    /// Build the document index from the data directory
    Index {
        /// Discard the persisted index and re-index every document
        #[arg(long)]
        rebuild: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write `.eduguard/config.toml` with default values
    Init,
    /// Print the merged configuration as TOML
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.verbose, cli.quiet);

    let workspace = match cli.workspace.canonicalize() {
        Ok(path) => path,
        Err(_) => std::env::current_dir()?,
    };

    let sources = commands::ConfigSources {
        file: cli.config,
        skip_user: cli.no_user_config,
    };
    commands::handle_command(cli.command, &workspace, &sources).await
}

/// Console level from the flags; `RUST_LOG` overrides it when set.
fn console_level(verbose: u8, quiet: bool) -> &'static str {
    match (verbose, quiet) {
        (0, true) => "error",
        (0, false) => "info",
        (1, _) => "debug",
        _ => "trace",
    }
}

/// Human-readable logs on stderr plus a daily JSON file in the user data dir.
/// The returned guard must live until exit so the file writer flushes.
fn init_tracing(verbose: u8, quiet: bool) -> WorkerGuard {
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(console_level(verbose, quiet))),
        );

    let log_dir = ProjectDirs::from("dev", "eduguard", "eduguard")
        .map_or_else(|| PathBuf::from("."), |dirs| dirs.data_dir().join("logs"));
    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("warning: cannot create {}: {}", log_dir.display(), e);
    }
    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(&log_dir, "eduguard.log"));
    let file = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry().with(console).with(file).init();
    guard
}
