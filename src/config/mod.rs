//! Daemon configuration, loaded from a TOML file.

use anyhow::Context;
use serde::Deserialize;

use crate::console::DEFAULT_MAX_LINES;
use crate::stats::DEFAULT_POLL_INTERVAL_HOURS;

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Config {
    /// Launch command for the supervised server, run through the platform
    /// shell (e.g. `java -Xmx8G -jar spigot-1.20.1.jar nogui`).
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub console: ConsoleConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub stats: StatsConfig,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ConsoleConfig {
    /// Retained-line cap of the console buffer.
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
    /// Optional regex with a named `level` capture group for classifying
    /// output lines. Defaults to the Minecraft-style pattern.
    pub log_pattern: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TelegramConfig {
    /// Bot API token. Empty disables the relay.
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Deserialize, Debug, Clone)]
pub struct StatsConfig {
    /// Hours between periodic stats reports.
    #[serde(default = "default_poll_hours")]
    pub poll_interval_hours: u64,
}

fn default_max_lines() -> usize {
    DEFAULT_MAX_LINES
}

fn default_poll_hours() -> u64 {
    DEFAULT_POLL_INTERVAL_HOURS
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
            log_pattern: None,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            poll_interval_hours: default_poll_hours(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file '{}'", path))?;
        let cfg = toml::from_str(&text)
            .with_context(|| format!("parsing config file '{}'", path))?;
        Ok(cfg)
    }

    /// Config file location, overridable via `WARDEN_CONFIG`.
    pub fn config_path() -> String {
        std::env::var("WARDEN_CONFIG").unwrap_or_else(|_| "config/warden.toml".to_string())
    }
}
