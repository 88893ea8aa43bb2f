//! Configuration management for the chat server binary.
//!
//! This module handles loading, validation, and conversion of server configuration
//! from TOML files and command-line arguments.

use anyhow::{bail, Context, Result};
use chat_server::config::DEFAULT_PORT;
use chat_server::ServerConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Log levels accepted in the configuration file and on the command line.
pub const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration settings
    pub server: ServerSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
///
/// Controls network binding, connection limits and timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the server to (e.g., "127.0.0.1:12345")
    pub bind_address: String,
    /// Maximum number of concurrent participants
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Upper bound on one write to a client, in milliseconds
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// How long shutdown waits for sessions to close, in milliseconds
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

fn default_max_connections() -> usize {
    1000
}

fn default_write_timeout_ms() -> u64 {
    5000
}

fn default_shutdown_timeout_ms() -> u64 {
    5000
}

/// Logging system configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: format!("127.0.0.1:{DEFAULT_PORT}"),
                max_connections: default_max_connections(),
                write_timeout_ms: default_write_timeout_ms(),
                shutdown_timeout_ms: default_shutdown_timeout_ms(),
            },
            logging: LoggingSettings::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let config: AppConfig = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Converts the application configuration to the server library's
    /// configuration.
    pub fn to_server_config(&self) -> Result<ServerConfig> {
        let bind_address: SocketAddr = self
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {}", self.server.bind_address))?;

        Ok(ServerConfig {
            bind_address,
            max_connections: self.server.max_connections,
            write_timeout: Duration::from_millis(self.server.write_timeout_ms),
            shutdown_timeout: Duration::from_millis(self.server.shutdown_timeout_ms),
        })
    }

    /// Validates the configuration for consistency and correctness.
    pub fn validate(&self) -> Result<()> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            bail!("Invalid bind address: {}", self.server.bind_address);
        }

        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than zero");
        }

        if self.server.write_timeout_ms == 0 {
            bail!("write_timeout_ms must be greater than zero");
        }

        if self.server.shutdown_timeout_ms == 0 {
            bail!("shutdown_timeout_ms must be greater than zero");
        }

        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level: {}. Must be one of: {VALID_LOG_LEVELS:?}",
                self.logging.level
            );
        }

        Ok(())
    }
}
