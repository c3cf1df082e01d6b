use std::sync::Arc;

use anyhow::Context;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

use warden_core::config::Config;
use warden_core::console::ConsoleBuffer;
use warden_core::supervisor::{ServerEvent, ServerSupervisor};
use warden_core::telegram::TelegramNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("warden-core starting");

    let config_path = Config::config_path();
    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!("Failed to load config '{}': {:#}, using defaults", config_path, e);
            Config::default()
        }
    };

    let notifier = match TelegramNotifier::new(&config.telegram.bot_token, &config.telegram.chat_id) {
        Ok(relay) => {
            let relay = Arc::new(relay);
            if relay.is_reachable().await {
                tracing::info!("Telegram bot connected");
            } else {
                tracing::warn!("Telegram bot is not reachable, reports may be lost");
            }
            Some(relay)
        }
        Err(e) => {
            tracing::warn!("Telegram relay disabled: {}", e);
            None
        }
    };

    let console = match config.console.log_pattern.as_deref() {
        Some(pattern) => ConsoleBuffer::with_pattern(config.console.max_lines, Some(pattern)),
        None => ConsoleBuffer::new(config.console.max_lines),
    };
    let supervisor = ServerSupervisor::new(console, notifier.clone(), config.stats.poll_interval_hours);

    // Render console lines and lifecycle transitions for the operator.
    let mut events = supervisor.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ServerEvent::Console { content, .. }) => println!("{}", content),
                Ok(event) => tracing::info!(?event, "server lifecycle event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Console viewer lagged, dropped {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if let Err(e) = supervisor.start(&config.command).await {
        if let Some(relay) = notifier {
            relay.shutdown().await;
        }
        return Err(e).context("failed to start the supervised server");
    }

    // Forward operator input to the server; `!stats` requests a report.
    let sup = Arc::clone(&supervisor);
    tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line == "!stats" {
                sup.request_stats().await;
                continue;
            }
            sup.send_command(line).await;
        }
    });

    tokio::signal::ctrl_c().await.ok();
    tracing::info!("Shutdown signal received, stopping server...");
    supervisor.stop().await;
    if let Some(relay) = notifier {
        relay.shutdown().await;
    }
    tracing::info!("warden-core shut down");
    Ok(())
}
