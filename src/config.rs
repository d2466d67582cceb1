//! Configuration module for file-courier.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{Args, Parser, Subcommand};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "file-courier")]
#[command(author = "file-courier authors")]
#[command(version = "0.1.0")]
#[command(about = "Line-framed GET/POST file transfer over TCP", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Transfer chunk size in bytes
    #[arg(long, global = true)]
    pub chunk_size: Option<usize>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve files from a directory
    Server(ServerArgs),
    /// Run a commands file against a server
    Client(ClientArgs),
}

#[derive(Args, Debug)]
pub struct ServerArgs {
    /// Port to listen on, all interfaces
    pub port: Option<u16>,

    /// Address to bind to (e.g., 127.0.0.1:8080)
    #[arg(short = 'l', long, conflicts_with = "port")]
    pub listen: Option<String>,

    /// Directory requests are resolved against
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Idle timeout in seconds for a single connection; divided by the live count
    #[arg(long)]
    pub idle_base_secs: Option<f64>,
}

#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server host
    pub host: Option<String>,

    /// Server port
    pub port: Option<u16>,

    /// File of `<method> <path>` lines
    #[arg(long)]
    pub commands: Option<PathBuf>,

    /// Directory local files are read from and written to
    #[arg(long)]
    pub root: Option<PathBuf>,

    /// Upload attempts before giving up
    #[arg(long)]
    pub max_attempts: Option<u32>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub transfer: TransferSection,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_idle_base_secs")]
    pub idle_base_secs: f64,
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            root: default_root(),
            idle_base_secs: default_idle_base_secs(),
            backlog: default_backlog(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_commands")]
    pub commands: PathBuf,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            commands: default_commands(),
            root: default_root(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Framing and chunking
#[derive(Debug, Deserialize)]
pub struct TransferSection {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_max_line_length")]
    pub max_line_length: usize,
}

impl Default for TransferSection {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_line_length: default_max_line_length(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
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
    "0.0.0.0:8080".to_string()
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_idle_base_secs() -> f64 {
    10.0
}

fn default_backlog() -> i32 {
    128
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_commands() -> PathBuf {
    PathBuf::from("commands.txt")
}

fn default_max_attempts() -> u32 {
    3
}

fn default_chunk_size() -> usize {
    crate::transfer::DEFAULT_CHUNK_SIZE
}

fn default_max_line_length() -> usize {
    crate::stream::DEFAULT_MAX_LINE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Resolved server settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub root: PathBuf,
    pub idle_base: Duration,
    pub backlog: i32,
    pub chunk_size: usize,
    pub max_line_length: usize,
}

/// Resolved client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub commands: PathBuf,
    pub root: PathBuf,
    pub max_attempts: u32,
    pub chunk_size: usize,
    pub max_line_length: usize,
}

impl ClientConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Which side this process runs
#[derive(Debug, Clone)]
pub enum RunMode {
    Server(ServerConfig),
    Client(ClientConfig),
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub mode: RunMode,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

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

    /// Merge CLI args over TOML values and validate the result.
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let chunk_size = cli.chunk_size.unwrap_or(toml_config.transfer.chunk_size);
        if chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".to_string()));
        }
        let max_line_length = toml_config.transfer.max_line_length;
        if max_line_length == 0 {
            return Err(ConfigError::Invalid("max_line_length must be > 0".to_string()));
        }

        let mode = match cli.command {
            Command::Server(args) => {
                let idle_base_secs = args
                    .idle_base_secs
                    .unwrap_or(toml_config.server.idle_base_secs);
                if !(idle_base_secs.is_finite() && idle_base_secs > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "idle_base_secs must be a positive number, got {}",
                        idle_base_secs
                    )));
                }

                let listen = match (args.listen, args.port) {
                    (Some(listen), _) => listen,
                    (None, Some(port)) => format!("0.0.0.0:{}", port),
                    (None, None) => toml_config.server.listen,
                };

                RunMode::Server(ServerConfig {
                    listen,
                    root: args.root.unwrap_or(toml_config.server.root),
                    idle_base: Duration::from_secs_f64(idle_base_secs),
                    backlog: toml_config.server.backlog,
                    chunk_size,
                    max_line_length,
                })
            }
            Command::Client(args) => {
                let max_attempts = args
                    .max_attempts
                    .unwrap_or(toml_config.client.max_attempts);
                if max_attempts == 0 {
                    return Err(ConfigError::Invalid("max_attempts must be >= 1".to_string()));
                }

                RunMode::Client(ClientConfig {
                    host: args.host.unwrap_or(toml_config.client.host),
                    port: args.port.unwrap_or(toml_config.client.port),
                    commands: args.commands.unwrap_or(toml_config.client.commands),
                    root: args.root.unwrap_or(toml_config.client.root),
                    max_attempts,
                    chunk_size,
                    max_line_length,
                })
            }
        };

        Ok(Config {
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            mode,
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
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
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.listen, "0.0.0.0:8080");
        assert_eq!(config.server.idle_base_secs, 10.0);
        assert_eq!(config.client.max_attempts, 3);
        assert_eq!(config.client.commands, PathBuf::from("commands.txt"));
        assert_eq!(config.transfer.chunk_size, 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:9000"
            root = "/srv/files"
            idle_base_secs = 2.5

            [client]
            host = "10.0.0.5"
            port = 9000
            max_attempts = 5

            [transfer]
            chunk_size = 4096

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen, "127.0.0.1:9000");
        assert_eq!(config.server.root, PathBuf::from("/srv/files"));
        assert_eq!(config.server.idle_base_secs, 2.5);
        assert_eq!(config.server.backlog, 128);
        assert_eq!(config.client.host, "10.0.0.5");
        assert_eq!(config.client.max_attempts, 5);
        assert_eq!(config.transfer.chunk_size, 4096);
        assert_eq!(config.transfer.max_line_length, 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_server_port_positional() {
        let config = Config::merge(parse(&["file-courier", "server", "9100"]), TomlConfig::default())
            .unwrap();
        match config.mode {
            RunMode::Server(server) => {
                assert_eq!(server.listen, "0.0.0.0:9100");
                assert_eq!(server.idle_base, Duration::from_secs(10));
                assert_eq!(server.chunk_size, 1024);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [client]
            host = "10.0.0.5"
            port = 9000
            [logging]
            level = "warn"
            "#,
        )
        .unwrap();

        let cli = parse(&[
            "file-courier",
            "--log-level",
            "debug",
            "client",
            "localhost",
            "7000",
            "--max-attempts",
            "7",
        ]);
        let config = Config::merge(cli, toml_config).unwrap();
        assert_eq!(config.log_level, "debug");
        match config.mode {
            RunMode::Client(client) => {
                assert_eq!(client.addr(), "localhost:7000");
                assert_eq!(client.max_attempts, 7);
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_toml_fills_client_gaps() {
        let toml_config: TomlConfig = toml::from_str("[client]\nport = 9000\n").unwrap();
        let config = Config::merge(parse(&["file-courier", "client"]), toml_config).unwrap();
        match config.mode {
            RunMode::Client(client) => assert_eq!(client.addr(), "127.0.0.1:9000"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values() {
        let cli = parse(&["file-courier", "--chunk-size", "0", "server"]);
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));

        let cli = parse(&["file-courier", "client", "--max-attempts", "0"]);
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));

        let cli = parse(&["file-courier", "server", "--idle-base-secs", "0"]);
        assert!(matches!(
            Config::merge(cli, TomlConfig::default()),
            Err(ConfigError::Invalid(_))
        ));
    }
}
