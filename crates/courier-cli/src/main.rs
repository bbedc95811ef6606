//! # courier
//!
//! Command-line client for the Courier realtime server. Connects with the
//! layered settings, prints connection and notification events as JSON
//! lines on stdout, and reads frames and commands from stdin. Logs go to
//! stderr.

#![deny(unsafe_code)]

mod commands;
mod output;
mod session;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use courier_core::logging::{init_json_subscriber, init_subscriber};
use courier_settings::{LogFormat, LoggingSettings, load_settings_from_path, settings_path};

/// Courier realtime client.
#[derive(Parser, Debug)]
#[command(name = "courier", about = "Courier realtime client", version)]
struct Cli {
    /// Settings file (defaults to `~/.courier/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Socket URL (overrides settings).
    #[arg(long)]
    url: Option<String>,

    /// Auth token sent as the `token` query parameter.
    #[arg(long, default_value = "")]
    token: String,

    /// Log filter (overrides settings; `RUST_LOG` takes precedence).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Connect and bridge stdin/stdout (default).
    Connect,
    /// Print the effective settings as JSON and exit.
    Config,
}

fn init_logging(logging: &LoggingSettings) {
    match logging.format {
        LogFormat::Compact => init_subscriber(&logging.level),
        LogFormat::Json => init_json_subscriber(&logging.level),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    if let Some(url) = args.url {
        settings.connection.url = url;
    }
    if let Some(level) = args.log_level {
        settings.logging.level = level;
    }
    settings.validate().context("Invalid settings")?;

    match args.command.unwrap_or(Mode::Connect) {
        Mode::Config => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Mode::Connect => {
            init_logging(&settings.logging);
            tracing::info!(url = %settings.connection.url, "starting courier");
            session::run(&settings, args.token).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn defaults_to_connect_mode() {
        let cli = Cli::try_parse_from(["courier", "--token", "abc"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.token, "abc");
    }

    #[test]
    fn config_subcommand_with_overrides() {
        let cli = Cli::try_parse_from([
            "courier",
            "--url",
            "wss://chat.example.com/ws",
            "--log-level",
            "debug",
            "config",
        ])
        .unwrap();
        assert_eq!(cli.command, Some(Mode::Config));
        assert_eq!(cli.url.as_deref(), Some("wss://chat.example.com/ws"));
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }
}
