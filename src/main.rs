//! # parley
//!
//! Terminal client for a two-party chat backend. Wires settings, logging and
//! transports into a `SessionController` and drives it from stdin.

#![deny(unsafe_code)]

mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::Level;

use parley_client::{ClientConfig, SessionController};
use parley_net::{HttpChatApi, WsConnector};
use parley_settings::{load_settings_from_path, settings_path, LoggingSettings, ParleySettings};
use parley_telemetry::{init_telemetry, parse_level, TelemetryConfig};

/// Terminal chat client.
#[derive(Parser, Debug)]
#[command(name = "parley", about = "Terminal client for a two-party chat backend")]
struct Cli {
    /// Base URL of the data API.
    #[arg(long)]
    api_url: Option<String>,

    /// Base URL of the push channel; the user id is appended.
    #[arg(long)]
    ws_url: Option<String>,

    /// Roster refresh interval in milliseconds.
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Settings file (default `~/.parley/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,

    /// Log in as this user on startup.
    #[arg(long)]
    username: Option<String>,
}

impl Cli {
    fn apply(&self, settings: &mut ParleySettings) {
        if let Some(url) = &self.api_url {
            settings.backend.api_url.clone_from(url);
        }
        if let Some(url) = &self.ws_url {
            settings.backend.ws_url.clone_from(url);
        }
        if let Some(ms) = self.poll_interval_ms {
            settings.roster.poll_interval_ms = ms;
        }
    }
}

fn telemetry_config(logging: &LoggingSettings) -> TelemetryConfig {
    TelemetryConfig {
        log_level: parse_level(&logging.level).unwrap_or(Level::INFO),
        module_levels: logging
            .modules
            .iter()
            .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
            .collect(),
        json: logging.json,
    }
}

fn build_controller(settings: &ParleySettings) -> Result<SessionController> {
    let api = HttpChatApi::new(
        &settings.backend.api_url,
        settings.backend.request_timeout(),
        settings.backend.connect_timeout(),
    )
    .context("Invalid data API URL")?;
    let connector = WsConnector::new(
        &settings.backend.ws_url,
        settings.channel.outbound_queue,
        settings.backend.connect_timeout(),
    )
    .context("Invalid push channel URL")?;
    Ok(SessionController::new(
        Arc::new(api),
        Arc::new(connector),
        ClientConfig {
            poll_interval: settings.roster.poll_interval(),
        },
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let path = cli.settings.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path).context("Failed to load settings")?;
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    let telemetry = init_telemetry(telemetry_config(&settings.logging)).context("Failed to initialize logging")?;
    tracing::info!(
        api_url = %settings.backend.api_url,
        ws_url = %settings.backend.ws_url,
        poll_interval_ms = settings.roster.poll_interval_ms,
        "starting parley"
    );

    let session = Arc::new(build_controller(&settings)?);
    let renderer = tokio::spawn(terminal::render_events(Arc::clone(&session), session.subscribe()));

    println!("{}", terminal::HELP);
    if let Some(name) = cli.username {
        let _ = terminal::execute(&session, &telemetry, terminal::Command::Login(name)).await;
    }

    let lines = BufReader::new(tokio::io::stdin()).lines();
    terminal::run(&session, &telemetry, lines).await.context("Failed to read stdin")?;

    let _ = session.logout();
    renderer.abort();
    tracing::info!("shutting down");
    Ok(())
}
