//! Startup configuration.
//!
//! Loaded once from TOML, validated, then shared read-only for the life of
//! the process.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use rustc_hash::FxHashSet;
use serde::Deserialize;

use crate::error::ConfigError;

const LOCAL_CONFIG_PATH: &str = "splitdns.toml";
const SYSTEM_CONFIG_PATH: &str = "/etc/splitdns/config.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub local: LocalConfig,
    pub logging: LoggingConfig,
}

/// Values given on the command line that replace file settings.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub port: Option<u16>,
    pub bind_address: Option<String>,
    pub upstreams: Vec<String>,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 53,
        }
    }
}

impl ServerConfig {
    /// The socket address the UDP listener binds to.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip = self
            .bind_address
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse()
            .map_err(|_| {
                ConfigError::Validation(format!("invalid bind address {:?}", self.bind_address))
            })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// How the forwarder walks its upstream list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One upstream at a time, in order, until one answers.
    #[default]
    Sequential,
    /// Query every upstream at once and keep the first answer.
    Race,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// `host:port` endpoints in fallback order.
    pub servers: Vec<String>,
    pub timeout_ms: u64,
    pub strategy: Strategy,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            servers: vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()],
            timeout_ms: 2000,
            strategy: Strategy::Sequential,
        }
    }
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// When set, only names under this suffix are answered locally and
    /// everything else is forwarded without consulting the table.
    pub zone: Option<String>,
    /// TTL of synthesized answers.
    pub ttl: u32,
    /// FQDN to IPv4 address.
    pub records: BTreeMap<String, String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            zone: None,
            ttl: 3600,
            records: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file or use defaults.
    ///
    /// Priority order:
    /// 1. Explicitly provided path
    /// 2. splitdns.toml in the current directory
    /// 3. /etc/splitdns/config.toml
    /// 4. Built-in defaults
    pub fn load(path: Option<&Path>, overrides: CliOverrides) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = path {
            Self::from_file(path)?
        } else if Path::new(LOCAL_CONFIG_PATH).exists() {
            Self::from_file(Path::new(LOCAL_CONFIG_PATH))?
        } else if Path::new(SYSTEM_CONFIG_PATH).exists() {
            Self::from_file(Path::new(SYSTEM_CONFIG_PATH))?
        } else {
            Self::default()
        };

        config.apply_cli_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.display().to_string(), e.to_string()))?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn apply_cli_overrides(&mut self, overrides: CliOverrides) {
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(bind) = overrides.bind_address {
            self.server.bind_address = bind;
        }
        if !overrides.upstreams.is_empty() {
            self.upstream.servers = overrides.upstreams;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.listen_addr()?;

        if self.upstream.servers.is_empty() {
            return Err(ConfigError::Validation(
                "at least one upstream server is required".to_string(),
            ));
        }
        for server in &self.upstream.servers {
            validate_endpoint(server)?;
        }
        if self.upstream.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "upstream timeout must be greater than zero".to_string(),
            ));
        }

        if let Some(zone) = &self.local.zone
            && zone.trim_matches('.').is_empty()
        {
            return Err(ConfigError::Validation(format!("invalid zone {zone:?}")));
        }

        let mut seen = FxHashSet::default();
        for (name, address) in &self.local.records {
            if name.trim_matches('.').is_empty() {
                return Err(ConfigError::Validation(format!(
                    "invalid record name {name:?}"
                )));
            }
            if address.parse::<Ipv4Addr>().is_err() {
                return Err(ConfigError::Validation(format!(
                    "record {name} has invalid IPv4 address {address:?}"
                )));
            }
            if !seen.insert(normalize_name(name)) {
                return Err(ConfigError::Validation(format!(
                    "duplicate record {name} (names are case-insensitive)"
                )));
            }
        }

        Ok(())
    }
}

/// Canonical table key: trimmed, lowercase, dot-terminated.
pub fn normalize_name(name: &str) -> String {
    let mut name = name.trim().to_lowercase();
    if !name.ends_with('.') {
        name.push('.');
    }
    name
}

/// Canonical zone suffix: lowercase with a leading and trailing dot.
pub fn normalize_zone(zone: &str) -> String {
    format!(".{}.", zone.trim().trim_matches('.').to_lowercase())
}

fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    let invalid =
        |reason: &str| ConfigError::Validation(format!("upstream {endpoint:?} {reason}"));

    if let Ok(addr) = endpoint.parse::<SocketAddr>() {
        if addr.port() == 0 {
            return Err(invalid("has port 0"));
        }
        return Ok(());
    }

    // Not an IP literal: must be hostname:port. IPv6 literals need brackets.
    let (host, port) = endpoint
        .rsplit_once(':')
        .ok_or_else(|| invalid("is not host:port"))?;
    if host.is_empty() || host.contains([':', '[', ']']) {
        return Err(invalid("is not host:port (IPv6 addresses need brackets)"));
    }
    match port.parse::<u16>() {
        Ok(0) => Err(invalid("has port 0")),
        Ok(_) => Ok(()),
        Err(_) => Err(invalid("is not host:port")),
    }
}
