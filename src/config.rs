//! CLI configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via RSERVE_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags (applied by the caller)

use rserve_client::ConnectionConfig;
use rserve_protocol::DEFAULT_PORT;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Connection and login settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Unix-domain socket path; takes precedence over host and port.
    pub socket: Option<PathBuf>,
    /// Login user.
    pub user: Option<String>,
    /// Login password.
    pub password: Option<String>,
    /// File whose first line is the password.
    pub password_file: Option<PathBuf>,
    /// Connect timeout in seconds (0 disables the timeout).
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds (0 disables the timeout).
    pub read_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            socket: None,
            user: None,
            password: None,
            password_file: None,
            connect_timeout_secs: 10,
            read_timeout_secs: 0,
        }
    }
}

impl Config {
    /// Loads `path` (or the file named by RSERVE_CONFIG), then applies
    /// environment variable overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os("RSERVE_CONFIG").map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
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

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`, keyed by environment variable name.
    /// Unparseable numbers are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("RSERVE_HOST") {
            self.host = host;
        }

        if let Some(port) = lookup("RSERVE_PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }

        if let Some(path) = lookup("RSERVE_SOCKET") {
            self.socket = Some(PathBuf::from(path));
        }

        if let Some(user) = lookup("RSERVE_USER") {
            self.user = Some(user);
        }

        if let Some(password) = lookup("RSERVE_PASSWORD") {
            self.password = Some(password);
        }

        if let Some(timeout) = lookup("RSERVE_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Some(timeout) = lookup("RSERVE_READ_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.read_timeout_secs = secs;
            }
        }
    }

    /// Reads the password from `password_file` unless one is already set.
    pub fn load_secrets(&mut self) -> Result<(), ConfigError> {
        if self.password.is_some() {
            return Ok(());
        }
        if let Some(ref path) = self.password_file {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(path.clone(), e))?;
            let line = content.lines().next().unwrap_or("").trim_end();
            self.password = Some(line.to_string());
        }
        Ok(())
    }

    /// Checks settings that cannot be expressed in the types.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.socket.is_none() {
            if self.host.is_empty() {
                return Err(ConfigError::ValidationError("host must not be empty".into()));
            }
            if self.port == 0 {
                return Err(ConfigError::ValidationError("port must not be 0".into()));
            }
        }
        if self.password.is_some() && self.user.is_none() {
            return Err(ConfigError::ValidationError(
                "password given without a user".into(),
            ));
        }
        Ok(())
    }

    /// User and password, when a login is configured.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        let user = self.user.as_deref()?;
        Some((user, self.password.as_deref().unwrap_or("")))
    }

    /// Library connection settings.
    pub fn connection_config(&self) -> ConnectionConfig {
        let config = match &self.socket {
            Some(path) => ConnectionConfig::local(path.clone()),
            None => ConnectionConfig::tcp(self.host.clone(), self.port),
        };
        config
            .with_connect_timeout(secs(self.connect_timeout_secs))
            .with_read_timeout(secs(self.read_timeout_secs))
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
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
                write!(f, "failed to read '{}': {}", path.display(), e)
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
