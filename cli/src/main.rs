//! Tally CLI - binary entry point.
//!
//! # Architecture
//!
//! ```text
//! main() -> Cli::parse() -> TallyConfig::load() -> ClientSettings::resolve()
//!                                   |
//!                                   v
//!                      Session (token from --token / TALLY_ACCESS_TOKEN)
//!                                   |
//!                                   v
//!                        commands::run(session, command)
//! ```
//!
//! Logs go to a file so stdout carries only command output.

mod commands;

use std::{
    fs::{self, File, OpenOptions},
    io,
    path::{Path, PathBuf},
    sync::Mutex,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tally_client::{AccessToken, Session};
use tally_config::{ClientSettings, ConfigError, ENV_ACCESS_TOKEN, ENV_API_URL, TallyConfig};

use crate::commands::Command;

/// tally - track focused work sessions against weekly task budgets
#[derive(Parser, Debug)]
#[command(name = "tally")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Access token to start with (defaults to $TALLY_ACCESS_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Service base URL (overrides config and $TALLY_API_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

/// Install the subscriber.
///
/// stdout carries command results and stderr the final error, so events only
/// ever go to a log file. With no writable log file they are dropped.
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let mut skipped = Vec::new();
    let opened = tally_log_file_candidates()
        .into_iter()
        .find_map(|path| match open_log_file(&path) {
            Ok(file) => Some((path, file)),
            Err(e) => {
                skipped.push(format!("Cannot log to {}: {e}", path.display()));
                None
            }
        });

    let Some((log_path, file)) = opened else {
        tracing_subscriber::registry().with(env_filter).init();
        return;
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .with(env_filter)
        .init();

    tracing::info!(
        path = %log_path.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Logging initialized"
    );
    for reason in skipped {
        tracing::warn!("{reason}");
    }
}

fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// `~/.tally/logs/tally.log`, then `./.tally/logs/tally.log`.
fn tally_log_file_candidates() -> Vec<PathBuf> {
    let relative = Path::new("logs").join("tally.log");
    tally_config::tally_dir()
        .map(|dir| dir.join(&relative))
        .into_iter()
        .chain(std::iter::once(Path::new(".tally").join(&relative)))
        .collect()
}

/// Resolve client settings. `--base-url` outranks `TALLY_API_URL`, which
/// outranks the config file.
fn resolve_settings(
    config: Option<&TallyConfig>,
    base_url_flag: Option<&str>,
    lookup_env: impl Fn(&str) -> Option<String>,
) -> Result<ClientSettings, ConfigError> {
    let flag = base_url_flag.map(str::trim).filter(|value| !value.is_empty());
    ClientSettings::resolve_with(config, |key| match flag {
        Some(value) if key == ENV_API_URL => Some(value.to_string()),
        _ => lookup_env(key),
    })
}

fn build_session(cli: &Cli) -> Result<Session> {
    let config = match TallyConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring unreadable config file");
            None
        }
    };

    let settings = resolve_settings(config.as_ref(), cli.base_url.as_deref(), |key| {
        std::env::var(key).ok()
    })?;
    tracing::debug!(?settings, "Resolved client settings");

    let session = Session::new(&settings).context("failed to create session")?;

    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var(ENV_ACCESS_TOKEN).ok())
        .filter(|value| !value.trim().is_empty());
    if let Some(token) = token {
        let token = AccessToken::new(token.trim())
            .context("access token contains invalid characters")?;
        session.set_credential(token);
    }

    Ok(session)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let session = build_session(&cli)?;
    let mut stdout = std::io::stdout().lock();
    commands::run(&session, cli.command, &mut stdout).await
}
