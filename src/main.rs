//! Codex Companion: publishes what Codex is doing to a status file.
//!
//! Tails the active Codex session rollout and keeps
//! `~/.claude-companion/status.json` current for a desktop pet to read.

use clap::Parser;
use codex_companion::agents::codex;
use codex_companion::companion;
use codex_companion::config::{Overrides, Settings};
use codex_companion::status::read_status_file;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt};

/// Any non-empty value raises the default log level to debug.
const DEBUG_ENV: &str = "COMPANION_DEBUG";

#[derive(Parser)]
#[command(name = "codex-companion", about = "Live status for Codex sessions")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Codex home directory (default: $CODEX_HOME or ~/.codex)
    #[arg(long, global = true)]
    codex_home: Option<PathBuf>,

    /// Status file to write (default: ~/.claude-companion/status.json)
    #[arg(long, global = true)]
    status_file: Option<PathBuf>,

    /// Fallback poll interval for session growth, in milliseconds
    #[arg(long, global = true)]
    poll_interval_ms: Option<u64>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand, Debug, PartialEq, Eq)]
enum Command {
    /// Watch Codex sessions and publish status (default)
    Watch,
    /// Print the path of the most recent session log
    Locate,
    /// Print the current status file
    Status,
}

impl Cli {
    fn overrides(&self) -> Overrides {
        Overrides {
            codex_home: self.codex_home.clone(),
            status_file: self.status_file.clone(),
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

fn init_tracing(verbose: u8) {
    let debug_requested = std::env::var_os(DEBUG_ENV).is_some_and(|v| !v.is_empty());
    let default_level = match verbose {
        0 if debug_requested => "debug",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("COMPANION_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let settings = Settings::resolve(cli.overrides());

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to create tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    match cli.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            match runtime.block_on(companion::run(&settings, shutdown_signal())) {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    error!(error = %e, "codex companion failed");
                    ExitCode::FAILURE
                }
            }
        }
        Command::Locate => {
            let found = runtime.block_on(codex::find_latest_session(
                &settings.sessions_root,
                &settings.session,
            ));
            match found {
                Some(path) => {
                    println!("{}", path.display());
                    ExitCode::SUCCESS
                }
                None => {
                    eprintln!("No Codex session found under {}", settings.sessions_root.display());
                    ExitCode::FAILURE
                }
            }
        }
        Command::Status => match read_status_file(&settings.status_file) {
            Some(status) => {
                match status.usage {
                    Some(usage) => println!(
                        "{}: {} (context {}, output {})",
                        status.status.as_str(),
                        status.action,
                        usage.context,
                        usage.output
                    ),
                    None => println!("{}: {}", status.status.as_str(), status.action),
                }
                ExitCode::SUCCESS
            }
            None => {
                eprintln!("No status at {}", settings.status_file.display());
                ExitCode::FAILURE
            }
        },
    }
}
