//! Configuration schema definitions.
//!
//! This module defines the complete configuration document for the server.
//! All types derive Serde traits for deserialization from TOML files.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::loader::ConfigError;

/// Root configuration document.
///
/// `version` is not part of the file; it is stamped by
/// [`ConfigStore`](crate::config::loader::ConfigStore) on every successful load.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConfigDocument {
    #[serde(skip)]
    pub version: u64,

    /// HTTP bind address and runtime mode.
    pub application: ApplicationConfig,

    /// TLS for the HTTP listener.
    #[serde(default)]
    pub ssl: SslConfig,

    /// Log sinks.
    #[serde(default)]
    pub logger: LoggerConfig,

    /// Default database, used when no tenant entry matches.
    pub database: DatabaseConfig,

    /// Tenant databases keyed by request host.
    #[serde(default)]
    pub databases: BTreeMap<String, DatabaseConfig>,

    #[serde(default)]
    pub reload: ReloadConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ConfigDocument {
    /// True if both documents describe the same set of database connections.
    pub fn same_topology(&self, other: &ConfigDocument) -> bool {
        self.database == other.database && self.databases == other.databases
    }

    /// True if a change between the documents can only take effect after a restart.
    pub fn listener_changed(&self, other: &ConfigDocument) -> bool {
        self.application.host != other.application.host
            || self.application.port != other.application.port
            || self.ssl != other.ssl
    }
}

/// Runtime mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Dev,
    Test,
    Prod,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Dev => f.write_str("dev"),
            Mode::Test => f.write_str("test"),
            Mode::Prod => f.write_str("prod"),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ApplicationConfig {
    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port. Zero picks an ephemeral port.
    pub port: u16,

    #[serde(default)]
    pub mode: Mode,

    /// Request timeout (total time for request/response) in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl ApplicationConfig {
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    30
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SslConfig {
    pub enable: bool,

    /// Path to certificate chain (PEM).
    pub pem: String,

    /// Path to private key (PEM).
    pub key: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggerConfig {
    /// Directory holding `bus.log`, `job.log` and `request.log`.
    pub path: String,

    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins when set.
    pub level: String,

    /// Write to stdout.
    pub stdout: bool,

    /// Write the file sinks under `path`.
    pub file: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            path: "temp/logs".to_string(),
            level: "info".to_string(),
            stdout: true,
            file: false,
        }
    }
}

/// Database dialect.
///
/// Unknown driver strings are rejected while the document is parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub enum Dialect {
    Postgres,
    MySql,
    Sqlite,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
            Dialect::Sqlite => "sqlite",
        }
    }
}

impl std::str::FromStr for Dialect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            _ => Err(ConfigError::UnknownDialect(s.to_string())),
        }
    }
}

impl TryFrom<String> for Dialect {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Dialect> for String {
    fn from(dialect: Dialect) -> Self {
        dialect.as_str().to_string()
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One database connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    pub driver: Dialect,

    /// Connection string.
    #[serde(alias = "dsn")]
    pub source: String,

    #[serde(default = "default_max_open_conns")]
    pub max_open_conns: u32,

    #[serde(default)]
    pub min_idle_conns: u32,

    #[serde(default = "default_conn_max_lifetime_secs")]
    pub conn_max_lifetime_secs: u64,

    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// A required tenant that fails to open fails the whole registry build.
    /// An optional one is skipped and its host falls back to the default.
    #[serde(default = "default_required")]
    pub required: bool,
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

fn default_max_open_conns() -> u32 {
    10
}

fn default_conn_max_lifetime_secs() -> u64 {
    30 * 60
}

fn default_idle_timeout_secs() -> u64 {
    10 * 60
}

fn default_acquire_timeout_secs() -> u64 {
    5
}

fn default_required() -> bool {
    true
}

/// How configuration changes are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchMode {
    /// OS file notifications.
    #[default]
    Notify,
    /// Periodic metadata polling.
    Poll,
}

/// Hot reload configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub enabled: bool,

    pub watch: WatchMode,

    /// Poll interval, only used with `watch = "poll"`.
    pub poll_interval_ms: u64,

    /// Quiet period before a change is dispatched; also the minimum gap between two reloads.
    pub debounce_ms: u64,

    /// How long a superseded registry snapshot keeps its handles open.
    pub retire_grace_ms: u64,
}

impl ReloadConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn retire_grace(&self) -> Duration {
        Duration::from_millis(self.retire_grace_ms)
    }
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            watch: WatchMode::Notify,
            poll_interval_ms: 2000,
            debounce_ms: 500,
            retire_grace_ms: 30_000,
        }
    }
}

/// Graceful shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Drain deadline for in-flight HTTP requests.
    pub grace_ms: u64,
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { grace_ms: 5000 }
    }
}

/// Background job configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JobsConfig {
    pub enabled: bool,

    /// Interval of the built-in database probe job. Zero disables it.
    pub probe_interval_secs: u64,

    /// How long a running job may take to honour cancellation before it is abandoned.
    pub job_timeout_ms: u64,
}

impl JobsConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_millis(self.job_timeout_ms)
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval_secs: 60,
            job_timeout_ms: 10_000,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,

    /// Prometheus scrape endpoint bind address.
    pub address: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: "127.0.0.1:9090".to_string(),
        }
    }
}
