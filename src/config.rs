use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::errors::ConfigError;

/// Which availability source the service talks to.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Scrape the live registration system.
    #[default]
    Registration,

    /// Serve canned seat counts (local testing without network access).
    Simulated,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// HTTP port to listen on.
    pub port: u16,

    /// Log level for tracing (e.g. "info", "debug").
    pub log_level: String,

    pub server_version: String,

    /// Path to the watchlist JSON file.
    pub watchlist_path: String,

    #[serde(default)]
    pub provider: ProviderKind,

    /// Detailed class information page of the registration system.
    /// `term_in` and `crn_in` are appended as query parameters.
    pub registration_url: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Delay (seconds) between the end of one poll cycle and the start of the next.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Delay (seconds) before the first poll cycle.
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,

    /// Upper bound (seconds) on a single availability fetch.
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// How many keys a poll cycle fetches at once.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// If set, every seat change is POSTed here once per watching subscriber.
    #[serde(default)]
    pub notify_webhook: Option<String>,
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64)".to_string()
}

fn default_poll_interval() -> u64 {
    60
}

fn default_startup_delay() -> u64 {
    2
}

fn default_fetch_timeout() -> u64 {
    10
}

fn default_max_concurrent_fetches() -> usize {
    4
}

/// Find `config.json` next to the executable, else one directory up.
pub fn locate(exe_dir: &Path) -> Result<PathBuf, ConfigError> {
    let candidates = [exe_dir.join("config.json"), exe_dir.join("..").join("config.json")];

    if let Some(found) = candidates.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }

    Err(ConfigError::NotFound {
        searched: candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
    })
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&file)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str::<AppConfig>(text).map_err(ConfigError::Parse)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_secs(self.startup_delay_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
