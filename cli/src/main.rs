//! Linterhub server binary.
//!
//! ```text
//! linterhub-server                    serve LSP on stdio
//! linterhub-server install [--mode M] [--dir PATH]
//! linterhub-server --version
//! ```
//!
//! Stdout carries the protocol, so logs only ever go to a file.

use std::{
    fs::{self, File, OpenOptions},
    path::PathBuf,
    process::ExitCode,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linterhub_config::{EngineDefaults, ServerConfig};
use linterhub_engine::{CommandRunner, EngineInstaller, InstallRequest, Installer, ProcessRunner};
use linterhub_lsp::Server;
use linterhub_types::EngineMode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // No log file: stay silent rather than corrupt the protocol stream.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.linterhub/logs/linterhub.log
    if let Some(config_path) = ServerConfig::path()
        && let Some(config_dir) = config_path.parent()
    {
        candidates.push(config_dir.join("logs").join("linterhub.log"));
    }

    candidates.push(PathBuf::from(".linterhub").join("logs").join("linterhub.log"));

    candidates
}

#[derive(Debug, Parser)]
#[command(name = "linterhub-server", version)]
#[command(about = "Linterhub language server and engine installer")]
struct Cli {
    /// Serve on stdin/stdout (the default; accepted for editor launchers)
    #[arg(long, hide = true)]
    stdio: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Download and unpack the engine runtime, then print its path
    Install {
        /// Engine mode: native, dotnet or docker
        #[arg(long)]
        mode: Option<EngineMode>,
        /// Install directory (defaults to the configured install dir)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

fn load_defaults() -> EngineDefaults {
    match ServerConfig::load() {
        Ok(Some(config)) => config.defaults(),
        Ok(None) => EngineDefaults::default(),
        Err(e) => {
            tracing::warn!("Ignoring unreadable server config: {e}");
            EngineDefaults::default()
        }
    }
}

async fn install(
    defaults: &EngineDefaults,
    mode: Option<EngineMode>,
    dir: Option<PathBuf>,
) -> Result<PathBuf> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ProcessRunner::new(defaults.max_output_bytes));
    let installer = EngineInstaller::new(defaults, runner);
    let request = InstallRequest {
        mode: mode.unwrap_or(defaults.mode),
        target_dir: dir.unwrap_or_else(|| defaults.install_dir.clone()),
        proxy: defaults.proxy.clone(),
        strict_ssl: defaults.strict_ssl,
    };

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let path = installer
        .install(&request, &cancel)
        .await
        .with_context(|| format!("installing {} engine", request.mode))?;
    tracing::info!(path = %path.display(), "Engine installed from the command line");
    Ok(path)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing();
    let defaults = load_defaults();

    match cli.command {
        Some(Command::Install { mode, dir }) => {
            let path = install(&defaults, mode, dir).await?;
            println!("{}", path.display());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                explicit = cli.stdio,
                "Serving on stdio"
            );
            let clean = Server::new(defaults)
                .serve(tokio::io::stdin(), tokio::io::stdout())
                .await?;
            Ok(if clean {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
