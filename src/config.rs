//! Configuration loading for redfish-mcp.
//!
//! Configuration is resolved from three fallback sources (tried in order):
//!
//! 1. **JSON file** via `--config <path>` CLI flag
//! 2. **JSON file** via `REDFISH_CONFIG_FILE` environment variable
//! 3. **Environment variables**: `REDFISH_HOSTS`, `REDFISH_PORT`,
//!    `REDFISH_USERNAME`, … (see [`load_from_vars`])
//!
//! The MCP settings (`MCP_TRANSPORT`, `MCP_REDFISH_LOG_LEVEL`) always come from
//! the environment. The JSON file mirrors [`RedfishConfig`]:
//!
//! ```json
//! {
//!   "hosts": [{ "address": "10.0.0.5", "username": "admin", "password": "secret" }],
//!   "port": 443,
//!   "auth_method": "session",
//!   "discovery_enabled": true,
//!   "discovery_interval": 30
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{AuthMethod, ClientConfig, DEFAULT_PORT};
use crate::retry::RetryPolicy;

pub const ENV_CONFIG_FILE: &str = "REDFISH_CONFIG_FILE";
const DEFAULT_HOSTS_JSON: &str = r#"[{"address": "127.0.0.1"}]"#;

/// CLI arguments parsed by `clap`.
#[derive(Parser)]
#[command(name = "redfish-mcp", version, about = "MCP server for Redfish BMC endpoints")]
pub struct Cli {
    /// Path to Redfish config file (JSON)
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {origin}: {source}")]
    Json {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    Invalid(String),
}

/// A single host entry, as written in `REDFISH_HOSTS` or the config file.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HostConfig {
    pub address: String,
    /// 0 means "use the global port".
    #[serde(default, skip_serializing_if = "is_zero")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_method: Option<AuthMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_server_ca_cert: Option<PathBuf>,
}

fn is_zero(port: &u16) -> bool {
    *port == 0
}

impl HostConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.address.trim().is_empty() {
            return Err("host address cannot be empty".into());
        }
        Ok(())
    }
}

/// MCP transport requested by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum McpTransport {
    #[default]
    Stdio,
    Sse,
    StreamableHttp,
}

impl std::str::FromStr for McpTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(McpTransport::Stdio),
            "sse" => Ok(McpTransport::Sse),
            "streamable-http" => Ok(McpTransport::StreamableHttp),
            other => Err(format!(
                "invalid transport: {other}. Must be one of: stdio, sse, streamable-http"
            )),
        }
    }
}

impl std::fmt::Display for McpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            McpTransport::Stdio => "stdio",
            McpTransport::Sse => "sse",
            McpTransport::StreamableHttp => "streamable-http",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    /// `tracing` filter directive for this level.
    pub fn as_filter(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error | LogLevel::Critical => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            _ => Err(format!(
                "invalid log_level: {s}. Must be one of: DEBUG, INFO, WARNING, ERROR, CRITICAL"
            )),
        }
    }
}

/// Redfish-side settings: hosts, global defaults, discovery and retry knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RedfishConfig {
    #[serde(default = "default_hosts")]
    pub hosts: Vec<HostConfig>,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_method: AuthMethod,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub tls_server_ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    #[serde(default)]
    pub discovery_enabled: bool,
    /// Seconds between discovery cycles.
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval: u64,
    /// Seconds each discovery cycle listens for answers.
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_jitter")]
    pub jitter: bool,
    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
}

fn default_hosts() -> Vec<HostConfig> {
    vec![HostConfig::new("127.0.0.1")]
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_discovery_interval() -> u64 {
    30
}
fn default_discovery_timeout() -> u64 {
    5
}
fn default_max_retries() -> u32 {
    3
}
fn default_initial_delay_ms() -> u64 {
    1000
}
fn default_max_delay_ms() -> u64 {
    60_000
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_jitter() -> bool {
    true
}
fn default_request_timeout() -> u64 {
    30
}

impl Default for RedfishConfig {
    fn default() -> Self {
        Self {
            hosts: default_hosts(),
            port: default_port(),
            auth_method: AuthMethod::default(),
            username: String::new(),
            password: String::new(),
            tls_server_ca_cert: None,
            insecure_skip_verify: false,
            discovery_enabled: false,
            discovery_interval: default_discovery_interval(),
            discovery_timeout: default_discovery_timeout(),
            max_retries: default_max_retries(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_factor: default_backoff_factor(),
            jitter: default_jitter(),
            request_timeout: default_request_timeout(),
        }
    }
}

impl RedfishConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(invalid("port must be between 1 and 65535, got: 0"));
        }
        if !(1..=3600).contains(&self.discovery_interval) {
            return Err(invalid(format!(
                "discovery interval must be between 1 and 3600 seconds, got: {}",
                self.discovery_interval
            )));
        }
        if !(1..=60).contains(&self.discovery_timeout) {
            return Err(invalid(format!(
                "discovery timeout must be between 1 and 60 seconds, got: {}",
                self.discovery_timeout
            )));
        }
        if self.max_retries > 10 {
            return Err(invalid(format!(
                "max retries must be at most 10, got: {}",
                self.max_retries
            )));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(invalid(format!(
                "backoff factor must be >= 1.0, got: {}",
                self.backoff_factor
            )));
        }
        if !(1..=600).contains(&self.request_timeout) {
            return Err(invalid(format!(
                "request timeout must be between 1 and 600 seconds, got: {}",
                self.request_timeout
            )));
        }
        for (i, host) in self.hosts.iter().enumerate() {
            host.validate()
                .map_err(|e| invalid(format!("invalid host configuration at index {i}: {e}")))?;
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_factor: self.backoff_factor,
            jitter: self.jitter,
        }
    }

    /// Global defaults every resolved client starts from (address left empty).
    pub fn client_defaults(&self) -> ClientConfig {
        ClientConfig {
            port: self.port,
            username: self.username.clone(),
            password: self.password.clone(),
            auth_method: self.auth_method,
            tls_server_ca_cert: self.tls_server_ca_cert.clone(),
            insecure_skip_verify: self.insecure_skip_verify,
            retry: self.retry_policy(),
            request_timeout: Duration::from_secs(self.request_timeout),
            ..ClientConfig::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct McpConfig {
    pub transport: McpTransport,
    pub log_level: LogLevel,
}

/// Validated configuration ready for use by the host registry and MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub redfish: RedfishConfig,
    pub mcp: McpConfig,
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(message.into())
}

/// Load and validate configuration from CLI args, a config file, or env vars.
pub fn load_config(cli: &Cli) -> Result<Config, ConfigError> {
    load_with(cli.config.as_deref(), |key| std::env::var(key).ok())
}

/// [`load_config`] with an injectable variable lookup.
pub fn load_with<F>(config_path: Option<&Path>, var: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let vars = Vars(var);
    let file = config_path
        .map(Path::to_path_buf)
        .or_else(|| vars.get(ENV_CONFIG_FILE).map(PathBuf::from));

    let redfish = match file {
        Some(path) => load_from_file(&expand_tilde(&path, &vars))?,
        None => load_from_vars(&vars)?,
    };
    let mcp = McpConfig {
        transport: vars.parse("MCP_TRANSPORT", McpTransport::Stdio)?,
        log_level: vars.parse("MCP_REDFISH_LOG_LEVEL", LogLevel::Info)?,
    };

    Ok(Config { redfish, mcp })
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde<F: Fn(&str) -> Option<String>>(path: &Path, vars: &Vars<F>) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = vars.get("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    path.to_path_buf()
}

pub fn load_from_file(path: &Path) -> Result<RedfishConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: RedfishConfig =
        serde_json::from_str(&contents).map_err(|source| ConfigError::Json {
            origin: format!("config file {}", path.display()),
            source,
        })?;
    config.validate()?;
    Ok(config)
}

/// Build [`RedfishConfig`] from `REDFISH_*` variables.
///
/// | Variable                       | Default                      |
/// |--------------------------------|------------------------------|
/// | `REDFISH_HOSTS`                | `[{"address": "127.0.0.1"}]` |
/// | `REDFISH_PORT`                 | 443                          |
/// | `REDFISH_AUTH_METHOD`          | `session`                    |
/// | `REDFISH_USERNAME` / `_PASSWORD` | empty                      |
/// | `REDFISH_SERVER_CA_CERT`       | none                         |
/// | `REDFISH_INSECURE_SKIP_VERIFY` | false                        |
/// | `REDFISH_DISCOVERY_ENABLED`    | false                        |
/// | `REDFISH_DISCOVERY_INTERVAL`   | 30 (s)                       |
/// | `REDFISH_DISCOVERY_TIMEOUT`    | 5 (s)                        |
/// | `REDFISH_MAX_RETRIES`          | 3                            |
/// | `REDFISH_INITIAL_DELAY_MS`     | 1000                         |
/// | `REDFISH_MAX_DELAY_MS`         | 60000                        |
/// | `REDFISH_BACKOFF_FACTOR`       | 2.0                          |
/// | `REDFISH_JITTER`               | true                         |
/// | `REDFISH_REQUEST_TIMEOUT`      | 30 (s)                       |
fn load_from_vars<F: Fn(&str) -> Option<String>>(vars: &Vars<F>) -> Result<RedfishConfig, ConfigError> {
    let hosts_json = vars.get("REDFISH_HOSTS");
    let hosts_json = hosts_json.as_deref().unwrap_or(DEFAULT_HOSTS_JSON);
    let hosts: Vec<HostConfig> =
        serde_json::from_str(hosts_json).map_err(|source| ConfigError::Json {
            origin: "REDFISH_HOSTS".into(),
            source,
        })?;

    let config = RedfishConfig {
        hosts,
        port: vars.int("REDFISH_PORT", DEFAULT_PORT, 1, u16::MAX)?,
        auth_method: vars.parse("REDFISH_AUTH_METHOD", AuthMethod::Session)?,
        username: vars.get("REDFISH_USERNAME").unwrap_or_default(),
        password: vars.get("REDFISH_PASSWORD").unwrap_or_default(),
        tls_server_ca_cert: vars.get("REDFISH_SERVER_CA_CERT").map(PathBuf::from),
        insecure_skip_verify: vars.flag("REDFISH_INSECURE_SKIP_VERIFY", false),
        discovery_enabled: vars.flag("REDFISH_DISCOVERY_ENABLED", false),
        discovery_interval: vars.int("REDFISH_DISCOVERY_INTERVAL", 30, 1, 3600)?,
        discovery_timeout: vars.int("REDFISH_DISCOVERY_TIMEOUT", 5, 1, 60)?,
        max_retries: vars.int("REDFISH_MAX_RETRIES", 3, 0, 10)?,
        initial_delay_ms: vars.int("REDFISH_INITIAL_DELAY_MS", 1000, 0, 600_000)?,
        max_delay_ms: vars.int("REDFISH_MAX_DELAY_MS", 60_000, 0, 3_600_000)?,
        backoff_factor: vars.parse("REDFISH_BACKOFF_FACTOR", 2.0)?,
        jitter: vars.flag("REDFISH_JITTER", true),
        request_timeout: vars.int("REDFISH_REQUEST_TIMEOUT", 30, 1, 600)?,
    };
    config.validate()?;
    Ok(config)
}

/// Variable lookup where empty values count as unset.
struct Vars<F>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(v) => v
                .parse()
                .map_err(|e| invalid(format!("environment variable {key}: {e}"))),
        }
    }

    /// Unparseable booleans fall back to `default`.
    fn flag(&self, key: &str, default: bool) -> bool {
        self.get(key).and_then(|v| parse_bool(&v)).unwrap_or(default)
    }

    fn int<T>(&self, key: &str, default: T, min: T, max: T) -> Result<T, ConfigError>
    where
        T: std::str::FromStr + PartialOrd + std::fmt::Display + Copy,
    {
        let Some(raw) = self.get(key) else {
            return Ok(default);
        };
        let value: T = raw
            .trim()
            .parse()
            .map_err(|_| invalid(format!("environment variable {key} must be an integer, got: {raw}")))?;
        if value < min {
            return Err(invalid(format!("environment variable {key} must be >= {min}, got: {value}")));
        }
        if value > max {
            return Err(invalid(format!("environment variable {key} must be <= {max}, got: {value}")));
        }
        Ok(value)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
