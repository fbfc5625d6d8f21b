//! Configuration module for the twinport server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "twinport")]
#[command(author = "twinport authors")]
#[command(version = "0.1.0")]
#[command(about = "Framed message relay with a plain-text fallback on the same port", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:2996)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of concurrent connections
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Seconds to wait for sessions to close on shutdown
    #[arg(long)]
    pub shutdown_grace: Option<u64>,

    /// Name reported for NAME queries (defaults to the host name)
    #[arg(long)]
    pub name: Option<String>,

    /// Maximum frame body size in bytes (0 = unlimited)
    #[arg(long)]
    pub max_body_size: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Shutdown grace period in seconds
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: u64,
    /// Name reported for NAME queries
    pub name: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            backlog: default_backlog(),
            shutdown_grace: default_shutdown_grace(),
            name: None,
        }
    }
}

/// Framed protocol configuration
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Maximum declared body length accepted (0 = unlimited)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Body of the welcome frame sent after the handshake
    #[serde(default = "default_welcome")]
    pub welcome: String,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_body_size: default_max_body_size(),
            welcome: default_welcome(),
        }
    }
}

/// Plain-text fallback configuration
#[derive(Debug, Deserialize)]
pub struct FallbackConfig {
    /// Bytes written verbatim in reply to a fallback request
    #[serde(default = "default_fallback_response")]
    pub response: String,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            response: default_fallback_response(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:2996".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_backlog() -> i32 {
    128
}

fn default_shutdown_grace() -> u64 {
    5
}

fn default_max_body_size() -> usize {
    16 * 1024 * 1024 // 16 MB
}

fn default_welcome() -> String {
    "Welcome to twinport (Protocol v1.0)".to_string()
}

fn default_fallback_response() -> String {
    "HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n\r\nHello from twinport (HTTP Mode)".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub max_connections: usize,
    pub backlog: i32,
    pub shutdown_grace: Duration,
    /// Reported for NAME queries. `None` means the host name.
    pub name: Option<String>,
    /// `None` means unlimited.
    pub max_body_size: Option<usize>,
    pub welcome: String,
    pub fallback_response: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::merge(CliArgs::parse_from(["twinport"]), TomlConfig::default())
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Self::merge(cli, toml_config))
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Self {
        let max_body_size = cli
            .max_body_size
            .unwrap_or(toml_config.protocol.max_body_size);

        Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            backlog: toml_config.server.backlog,
            shutdown_grace: Duration::from_secs(
                cli.shutdown_grace
                    .unwrap_or(toml_config.server.shutdown_grace),
            ),
            name: cli.name.or(toml_config.server.name),
            max_body_size: (max_body_size > 0).then_some(max_body_size),
            welcome: toml_config.protocol.welcome,
            fallback_response: toml_config.fallback.response,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        }
    }

    /// Name reported for NAME queries.
    pub fn server_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => hostname::get()
                .map(|h| h.to_string_lossy().into_owned())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, toml::de::Error),
}
