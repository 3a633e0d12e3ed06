//! Client configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via CRDTKV_CONFIG or --config)
//! 3. Environment variables

use crate::coordinator::DEFAULT_MAX_RETRIES;
use crate::node::{NodeId, SelectionPolicy, DEFAULT_ERROR_THRESHOLD};
use crate::score::DEFAULT_HALF_LIFE;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Cluster nodes, as `host:port` strings.
    #[serde(with = "node_list_serde")]
    pub nodes: Vec<NodeId>,
    /// Retries after the first attempt on network failure.
    pub max_retries: u32,
    /// TCP connect timeout in milliseconds.
    pub connect_timeout_ms: u64,
    /// Socket read timeout in milliseconds (none waits forever).
    pub read_timeout_ms: Option<u64>,
    /// Socket write timeout in milliseconds (none waits forever).
    pub write_timeout_ms: Option<u64>,
    /// Connection pool configuration.
    pub pool: PoolConfig,
    /// Node selection configuration.
    pub selection: SelectionConfig,
    /// Credentials sent after connecting.
    pub credentials: Option<Credentials>,
    /// TLS configuration. Connections are plain TCP when absent.
    pub tls: Option<TlsClientConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            nodes: vec![NodeId::new("127.0.0.1", crdtkv_protocol::DEFAULT_PORT)],
            max_retries: DEFAULT_MAX_RETRIES,
            connect_timeout_ms: 5000,
            read_timeout_ms: None,
            write_timeout_ms: None,
            pool: PoolConfig::default(),
            selection: SelectionConfig::default(),
            credentials: None,
            tls: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("CRDTKV_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: ClientConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Applies environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    ///
    /// Unparseable numbers are ignored; an unparseable node list is an error.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(nodes) = lookup("CRDTKV_NODES") {
            self.nodes = parse_node_list(&nodes)?;
        }

        if let Some(retries) = lookup("CRDTKV_MAX_RETRIES") {
            if let Ok(n) = retries.parse() {
                self.max_retries = n;
            }
        }

        if let Some(timeout) = lookup("CRDTKV_CONNECT_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.connect_timeout_ms = ms;
            }
        }

        if let Some(timeout) = lookup("CRDTKV_READ_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.read_timeout_ms = Some(ms);
            }
        }

        if let Some(timeout) = lookup("CRDTKV_WRITE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.write_timeout_ms = Some(ms);
            }
        }

        if let Some(user) = lookup("CRDTKV_USER") {
            let password = lookup("CRDTKV_PASSWORD")
                .or_else(|| self.credentials.as_ref().map(|c| c.password.clone()))
                .unwrap_or_default();
            self.credentials = Some(Credentials::new(user, password));
        }

        self.set_tls_enabled(lookup("CRDTKV_TLS").map(|v| is_truthy(&v)));
        if let Some(path) = lookup("CRDTKV_TLS_CA") {
            self.tls.get_or_insert_with(TlsClientConfig::default).ca_cert_path = Some(path.into());
        }
        if let Some(insecure) = lookup("CRDTKV_TLS_INSECURE") {
            if is_truthy(&insecure) {
                self.tls.get_or_insert_with(TlsClientConfig::default).insecure = true;
            }
        }

        Ok(())
    }

    fn set_tls_enabled(&mut self, enabled: Option<bool>) {
        match enabled {
            Some(true) => {
                self.tls.get_or_insert_with(TlsClientConfig::default);
            }
            Some(false) => self.tls = None,
            None => {}
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one node must be configured".to_string(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be positive".to_string(),
            ));
        }
        if self.read_timeout_ms == Some(0) || self.write_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "read/write timeouts must be positive when set".to_string(),
            ));
        }
        if self.pool.max_size == Some(0) {
            return Err(ConfigError::ValidationError(
                "pool.max_size must be positive when set".to_string(),
            ));
        }
        self.selection.validate()?;
        if let Some(ref tls) = self.tls {
            tls.validate()?;
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_ms.map(Duration::from_millis)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout_ms.map(Duration::from_millis)
    }

    /// Returns the node selection policy.
    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            error_threshold: self.selection.error_threshold,
            half_life: Duration::from_secs_f64(self.selection.half_life_secs),
        }
    }

    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = NodeId>) -> Self {
        self.nodes = nodes.into_iter().collect();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_max_pool_size(mut self, size: usize) -> Self {
        self.pool.max_size = Some(size);
        self
    }

    pub fn with_selection(mut self, policy: SelectionPolicy) -> Self {
        self.selection = SelectionConfig {
            error_threshold: policy.error_threshold,
            half_life_secs: policy.half_life.as_secs_f64(),
        };
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_tls(mut self, tls: TlsClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }
}

/// Connection pool configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on open connections (none means unbounded).
    pub max_size: Option<usize>,
}

/// Node selection configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Error score at or above which a node is avoided.
    pub error_threshold: f64,
    /// Half-life of node error scores in seconds.
    pub half_life_secs: f64,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            error_threshold: DEFAULT_ERROR_THRESHOLD,
            half_life_secs: DEFAULT_HALF_LIFE.as_secs_f64(),
        }
    }
}

impl SelectionConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.error_threshold.is_finite() && self.error_threshold > 0.0) {
            return Err(ConfigError::ValidationError(
                "selection.error_threshold must be a positive number".to_string(),
            ));
        }
        if !(self.half_life_secs.is_finite() && self.half_life_secs > 0.0) {
            return Err(ConfigError::ValidationError(
                "selection.half_life_secs must be a positive number".to_string(),
            ));
        }
        Ok(())
    }
}

/// User credentials for the authentication handshake.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// TLS configuration for client connections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsClientConfig {
    /// Path to PEM-encoded CA certificate(s) for server verification.
    /// If None, the bundled web PKI roots are used.
    pub ca_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client certificate (for mTLS).
    pub client_cert_path: Option<PathBuf>,
    /// Path to PEM-encoded client private key (for mTLS).
    pub client_key_path: Option<PathBuf>,
    /// Skip server certificate verification (INSECURE - development only).
    pub insecure: bool,
    /// Server name for SNI (defaults to the node's host).
    pub server_name: Option<String>,
}

impl TlsClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_cert(
        mut self,
        cert_path: impl Into<PathBuf>,
        key_path: impl Into<PathBuf>,
    ) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }

    pub fn with_insecure(mut self) -> Self {
        self.insecure = true;
        self
    }

    pub fn with_server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = Some(name.into());
        self
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_cert_path.is_some() != self.client_key_path.is_some() {
            return Err(ConfigError::ValidationError(
                "client_cert_path and client_key_path must be set together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parses a comma-separated list of node addresses.
pub fn parse_node_list(s: &str) -> Result<Vec<NodeId>, ConfigError> {
    s.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::parse)
        .collect()
}

fn is_truthy(value: &str) -> bool {
    value == "1" || value.eq_ignore_ascii_case("true")
}

/// Custom serde module for node lists (as `host:port` strings in YAML).
mod node_list_serde {
    use super::NodeId;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(nodes: &[NodeId], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(nodes.iter().map(|n| n.to_string()))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<NodeId>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let addrs = Vec::<String>::deserialize(deserializer)?;
        addrs
            .iter()
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .collect()
    }
}
