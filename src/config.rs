//! Configuration module for the echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "echo-server")]
#[command(author = "echo-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A byte-transparent TCP/TLS echo server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:25000, or file:/tmp/echo.sock)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Port to listen on, replacing the port of the listen address
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Terminate TLS on every accepted connection
    #[arg(long, alias = "tls")]
    pub ssl: bool,

    /// PEM file holding the server certificate chain
    #[arg(long)]
    pub cert: Option<PathBuf>,

    /// PEM file holding the server private key
    #[arg(long)]
    pub key: Option<PathBuf>,

    /// Size of the per-connection read buffer in bytes
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Leave Nagle's algorithm enabled on accepted sockets
    #[arg(long)]
    pub no_nodelay: bool,

    /// Maximum number of concurrently served connections (unlimited if unset)
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Number of worker threads (defaults to number of CPU cores)
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
    pub tls: TlsConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Listen backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
    /// Admission ceiling for concurrent connections
    pub max_connections: Option<usize>,
    /// Number of worker threads
    pub workers: Option<usize>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            max_connections: None,
            workers: None,
        }
    }
}

/// TLS-related configuration
#[derive(Debug, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_cert_path")]
    pub cert: PathBuf,
    #[serde(default = "default_key_path")]
    pub key: PathBuf,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            cert: default_cert_path(),
            key: default_key_path(),
        }
    }
}

/// Per-connection configuration
#[derive(Debug, Deserialize)]
pub struct ConnectionConfig {
    /// Read buffer capacity in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Set TCP_NODELAY on accepted sockets
    #[serde(default = "default_nodelay")]
    pub nodelay: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            nodelay: default_nodelay(),
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

/// Port of the reference deployment
pub const DEFAULT_PORT: u16 = 25000;

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_backlog() -> i32 {
    1024
}

fn default_cert_path() -> PathBuf {
    PathBuf::from("ssl_test.crt")
}

fn default_key_path() -> PathBuf {
    PathBuf::from("ssl_test_rsa")
}

fn default_buffer_size() -> usize {
    100 * 1024 // 102400 bytes
}

fn default_nodelay() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where the server listens.
///
/// Written as `<ip>:<port>` for TCP or `file:<path>` for a Unix domain
/// socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl FromStr for ListenAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(path) = s.strip_prefix("file:") {
            if path.is_empty() {
                return Err(ConfigError::InvalidListen(s.to_string()));
            }
            return Ok(ListenAddr::Unix(PathBuf::from(path)));
        }
        s.parse()
            .map(ListenAddr::Tcp)
            .map_err(|_| ConfigError::InvalidListen(s.to_string()))
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "{addr}"),
            ListenAddr::Unix(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// TLS material location, present only when TLS is selected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsPaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenAddr,
    pub backlog: i32,
    pub tls: Option<TlsPaths>,
    pub buffer_size: usize,
    pub nodelay: bool,
    pub max_connections: Option<usize>,
    pub workers: Option<usize>,
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

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let mut listen: ListenAddr = cli
            .listen
            .unwrap_or(toml_config.server.listen)
            .parse()?;
        if let Some(port) = cli.port {
            match listen {
                ListenAddr::Tcp(ref mut addr) => addr.set_port(port),
                ListenAddr::Unix(_) => return Err(ConfigError::PortOnUnixSocket),
            }
        }

        // Zero workers means one per CPU core
        let workers = cli
            .workers
            .or(toml_config.server.workers)
            .filter(|&w| w > 0);

        let max_connections = cli
            .max_connections
            .or(toml_config.server.max_connections);
        if max_connections == Some(0) {
            return Err(ConfigError::InvalidMaxConnections);
        }

        let buffer_size = cli
            .buffer_size
            .unwrap_or(toml_config.connection.buffer_size);
        if buffer_size == 0 {
            return Err(ConfigError::InvalidBufferSize);
        }

        let tls = if cli.ssl || toml_config.tls.enabled {
            Some(TlsPaths {
                cert: cli.cert.unwrap_or(toml_config.tls.cert),
                key: cli.key.unwrap_or(toml_config.tls.key),
            })
        } else {
            None
        };

        Ok(Config {
            listen,
            backlog: toml_config.server.backlog,
            tls,
            buffer_size,
            nodelay: !cli.no_nodelay && toml_config.connection.nodelay,
            max_connections,
            workers,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidListen(String),
    PortOnUnixSocket,
    InvalidBufferSize,
    InvalidMaxConnections,
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
            ConfigError::InvalidListen(addr) => {
                write!(
                    f,
                    "Invalid listen address '{addr}': expected <ip>:<port> or file:<path>"
                )
            }
            ConfigError::PortOnUnixSocket => {
                write!(f, "A port cannot be set for a Unix socket listen address")
            }
            ConfigError::InvalidBufferSize => {
                write!(f, "Buffer size must be greater than zero")
            }
            ConfigError::InvalidMaxConnections => {
                write!(f, "Max connections must be greater than zero")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["echo-server"];
        argv.extend_from_slice(args);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_default_config() {
        let config = Config::merge(cli(&[]), TomlConfig::default()).unwrap();
        assert_eq!(config.listen, "0.0.0.0:25000".parse().unwrap());
        assert_eq!(config.buffer_size, 102400);
        assert_eq!(config.backlog, 1024);
        assert!(config.tls.is_none());
        assert!(config.nodelay);
        assert!(config.max_connections.is_none());
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_ssl_switch() {
        let config = Config::merge(cli(&["--ssl"]), TomlConfig::default()).unwrap();
        let tls = config.tls.unwrap();
        assert_eq!(tls.cert, PathBuf::from("ssl_test.crt"));
        assert_eq!(tls.key, PathBuf::from("ssl_test_rsa"));

        let config = Config::merge(
            cli(&["--tls", "--cert", "a.pem", "--key", "b.pem"]),
            TomlConfig::default(),
        )
        .unwrap();
        assert_eq!(
            config.tls,
            Some(TlsPaths {
                cert: PathBuf::from("a.pem"),
                key: PathBuf::from("b.pem"),
            })
        );
    }

    #[test]
    fn test_port_override() {
        let config = Config::merge(
            cli(&["-l", "127.0.0.1:9000", "-p", "9100"]),
            TomlConfig::default(),
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:9100".parse().unwrap());
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::merge(cli(&["-l", "nowhere"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(_)));

        let err = Config::merge(cli(&["-b", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBufferSize));

        let err = Config::merge(cli(&["-l", "file:"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidListen(_)));
    }

    #[test]
    fn test_zero_workers_means_cpu_count() {
        let config = Config::merge(cli(&["-w", "0"]), TomlConfig::default()).unwrap();
        assert_eq!(config.workers, None);

        let toml_config: TomlConfig = toml::from_str("[server]\nworkers = 0\n").unwrap();
        let config = Config::merge(cli(&[]), toml_config).unwrap();
        assert_eq!(config.workers, None);
    }

    #[test]
    fn test_zero_max_connections_rejected() {
        let err = Config::merge(cli(&["--max-connections", "0"]), TomlConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMaxConnections));

        let toml_config: TomlConfig =
            toml::from_str("[server]\nmax_connections = 0\n").unwrap();
        let err = Config::merge(cli(&[]), toml_config).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidMaxConnections));

        let config =
            Config::merge(cli(&["--max-connections", "1"]), TomlConfig::default()).unwrap();
        assert_eq!(config.max_connections, Some(1));
    }

    #[test]
    fn test_unix_listen_address() {
        let config =
            Config::merge(cli(&["-l", "file:/tmp/echo.sock"]), TomlConfig::default()).unwrap();
        assert_eq!(
            config.listen,
            ListenAddr::Unix(PathBuf::from("/tmp/echo.sock"))
        );
        assert_eq!(config.listen.to_string(), "file:/tmp/echo.sock");

        let err = Config::merge(
            cli(&["-l", "file:/tmp/echo.sock", "-p", "9000"]),
            TomlConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::PortOnUnixSocket));
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:7000"
            backlog = 64
            max_connections = 16
            workers = 4

            [tls]
            enabled = true
            cert = "/etc/echo/cert.pem"
            key = "/etc/echo/key.pem"

            [connection]
            buffer_size = 4096
            nodelay = false

            [logging]
            level = "debug"
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(cli(&[]), toml_config).unwrap();
        assert_eq!(config.listen, "127.0.0.1:7000".parse().unwrap());
        assert_eq!(config.backlog, 64);
        assert_eq!(config.max_connections, Some(16));
        assert_eq!(config.workers, Some(4));
        assert_eq!(
            config.tls.unwrap().cert,
            PathBuf::from("/etc/echo/cert.pem")
        );
        assert_eq!(config.buffer_size, 4096);
        assert!(!config.nodelay);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_str = r#"
            [server]
            listen = "127.0.0.1:7000"
            workers = 4

            [connection]
            buffer_size = 4096
        "#;

        let toml_config: TomlConfig = toml::from_str(toml_str).unwrap();
        let config = Config::merge(
            cli(&["-l", "127.0.0.1:7001", "-w", "2", "-b", "8192", "--log-level", "trace"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.listen, "127.0.0.1:7001".parse().unwrap());
        assert_eq!(config.workers, Some(2));
        assert_eq!(config.buffer_size, 8192);
        assert_eq!(config.log_level, "trace");
    }
}
