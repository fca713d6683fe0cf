//! Configuration management
//!
//! A small YAML configuration with environment and CLI overrides. Two
//! knobs matter operationally: where the registry database lives and how
//! long an idle session survives. Precedence, lowest to highest: file,
//! environment (`MCPHUB_DB`, `MCPHUB_IDLE_TIMEOUT`), command line.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cli::Cli;
use crate::error::{McpHubError, Result};

fn default_listen_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_idle_timeout() -> u64 {
    300
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Registry database path; `None` uses the platform data directory.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    /// Bind address for the HTTP surface.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Seconds before an idle pooled session is evicted.
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            listen_addr: default_listen_addr(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

impl Config {
    /// Load configuration, then apply environment overrides.
    ///
    /// With `path = None` the defaults are used; an explicitly named file
    /// must exist and parse.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    McpHubError::Config(format!("cannot read config file {path}: {e}"))
                })?;
                serde_yaml::from_str(&raw)
                    .map_err(|e| McpHubError::Config(format!("invalid config file {path}: {e}")))?
            }
            None => Config::default(),
        };

        if let Ok(db) = std::env::var("MCPHUB_DB") {
            if !db.is_empty() {
                config.database_path = Some(PathBuf::from(db));
            }
        }
        if let Ok(timeout) = std::env::var("MCPHUB_IDLE_TIMEOUT") {
            let secs = timeout.parse::<u64>().map_err(|_| {
                McpHubError::Config(format!("MCPHUB_IDLE_TIMEOUT is not a number: {timeout}"))
            })?;
            config.idle_timeout_secs = secs;
        }

        Ok(config)
    }

    /// Apply command-line overrides on top of file and environment values.
    pub fn apply_overrides(&mut self, cli: &Cli) {
        if let Some(db_path) = &cli.db_path {
            self.database_path = Some(db_path.clone());
        }
        if let Some(listen) = &cli.listen {
            self.listen_addr = listen.clone();
        }
        if let Some(idle) = cli.idle_timeout {
            self.idle_timeout_secs = idle;
        }
    }

    /// Validate the effective configuration.
    pub fn validate(&self) -> Result<()> {
        if self.idle_timeout_secs == 0 {
            return Err(McpHubError::Config("idle_timeout_secs must be at least 1".into()).into());
        }
        self.listen_addr
            .parse::<std::net::SocketAddr>()
            .map_err(|e| {
                McpHubError::Config(format!("listen_addr is not a socket address: {e}"))
            })?;
        Ok(())
    }

    /// The idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
