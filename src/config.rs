//! Configuration module for duoserve.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Connection-concurrency model, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Model {
    /// One independently scheduled task per accepted connection.
    Concurrent,
    /// A single loop that finishes each connection before accepting the next.
    Sequential,
}

impl Model {
    /// Name reported by `/hello` and `/metrics`.
    pub fn label(self) -> &'static str {
        match self {
            Model::Concurrent => "multithreaded",
            Model::Sequential => "single-threaded",
        }
    }

    fn default_listen(self) -> &'static str {
        match self {
            Model::Concurrent => "127.0.0.1:8012",
            Model::Sequential => "127.0.0.1:8011",
        }
    }
}

/// Command-line arguments for the benchmark server
#[derive(Parser, Debug)]
#[command(name = "duoserve")]
#[command(author = "duoserve authors")]
#[command(version = "0.1.0")]
#[command(about = "HTTP workload benchmark server with a WebSocket signaling relay")]
#[command(long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:8012)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Connection model
    #[arg(long, value_enum)]
    pub model: Option<Model>,

    /// Number of worker threads for the concurrent model (defaults to number of CPU cores)
    #[arg(short = 'w', long)]
    pub workers: Option<usize>,

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
    pub workload: WorkloadConfig,
    #[serde(default)]
    pub signaling: SignalingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to; defaults depend on the model
    pub listen: Option<String>,
    /// Connection model
    #[serde(default = "default_model")]
    pub model: Model,
    /// Number of worker threads
    pub workers: Option<usize>,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: None,
            model: default_model(),
            workers: None,
            backlog: default_backlog(),
        }
    }
}

/// Defaults for the benchmark endpoints
#[derive(Debug, Deserialize)]
pub struct WorkloadConfig {
    /// Busy-wait duration for `/compute` without a usable `ms` parameter
    #[serde(default = "default_compute_ms")]
    pub compute_default_ms: i64,
    /// Body size for `/io` without a usable `bytes` parameter
    #[serde(default = "default_io_bytes")]
    pub io_default_bytes: i64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            compute_default_ms: default_compute_ms(),
            io_default_bytes: default_io_bytes(),
        }
    }
}

/// WebSocket relay configuration
#[derive(Debug, Deserialize)]
pub struct SignalingConfig {
    /// Room used when `/ws` has no `room` parameter
    #[serde(default = "default_room")]
    pub default_room: String,
    /// Largest accepted client frame payload
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: u64,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            default_room: default_room(),
            max_frame_bytes: default_max_frame_bytes(),
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

fn default_model() -> Model {
    Model::Concurrent
}

fn default_backlog() -> i32 {
    1024
}

fn default_compute_ms() -> i64 {
    50
}

fn default_io_bytes() -> i64 {
    1024 * 1024 // 1 MiB
}

fn default_room() -> String {
    "default".to_string()
}

fn default_max_frame_bytes() -> u64 {
    16 * 1024 * 1024 // 16 MiB
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub model: Model,
    pub workers: Option<usize>,
    pub backlog: i32,
    pub compute_default_ms: i64,
    pub io_default_bytes: i64,
    pub default_room: String,
    pub max_frame_bytes: u64,
    pub log_level: String,
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

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let model = cli.model.unwrap_or(toml_config.server.model);
        let listen = cli
            .listen
            .or(toml_config.server.listen)
            .unwrap_or_else(|| model.default_listen().to_string());
        let listen: SocketAddr = listen
            .parse()
            .map_err(|e| ConfigError::InvalidListen(listen.clone(), e))?;

        Ok(Config {
            listen,
            model,
            workers: cli.workers.or(toml_config.server.workers),
            backlog: toml_config.server.backlog,
            compute_default_ms: toml_config.workload.compute_default_ms,
            io_default_bytes: toml_config.workload.io_default_bytes,
            default_room: toml_config.signaling.default_room,
            max_frame_bytes: toml_config.signaling.max_frame_bytes,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Configuration suitable for tests: ephemeral port, built-in defaults.
    #[cfg(test)]
    pub fn for_tests(model: Model) -> Self {
        let toml = TomlConfig::default();
        Config {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            model,
            workers: Some(2),
            backlog: toml.server.backlog,
            compute_default_ms: toml.workload.compute_default_ms,
            io_default_bytes: toml.workload.io_default_bytes,
            default_room: toml.signaling.default_room,
            max_frame_bytes: toml.signaling.max_frame_bytes,
            log_level: toml.logging.level,
        }
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String, std::net::AddrParseError),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidListen(addr, e) => {
                write!(f, "Invalid listen address '{}': {}", addr, e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["duoserve"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, None);
        assert_eq!(config.server.model, Model::Concurrent);
        assert_eq!(config.workload.compute_default_ms, 50);
        assert_eq!(config.workload.io_default_bytes, 1024 * 1024);
        assert_eq!(config.signaling.default_room, "default");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "0.0.0.0:9000"
            model = "sequential"
            workers = 4

            [workload]
            compute_default_ms = 10

            [signaling]
            default_room = "lobby"

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(config.server.model, Model::Sequential);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.workload.compute_default_ms, 10);
        assert_eq!(config.workload.io_default_bytes, 1024 * 1024);
        assert_eq!(config.signaling.default_room, "lobby");
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_listen_defaults_follow_model() {
        let config = Config::merge(cli(&["--model", "sequential"]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen.port(), 8011);

        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.model, Model::Concurrent);
        assert_eq!(config.listen.port(), 8012);
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            listen = "127.0.0.1:7000"
            model = "sequential"
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["-l", "127.0.0.1:7001", "--model", "concurrent"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.listen.port(), 7001);
        assert_eq!(config.model, Model::Concurrent);
    }

    #[test]
    fn test_invalid_listen() {
        let err = Config::merge(cli(&["-l", "not-an-address"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(..)));
    }
}
