//! YAML configuration file
//!
//! The file describes the reachable hosts (`connections`), the defaults every
//! connection inherits (`defaults`) and the pool limits (`pool`). String values
//! may reference environment variables as `${VAR}`; placeholders naming unset
//! variables are left as written.
//!
//! ```yaml
//! connections:
//!   web:
//!     hostname: web.internal
//!     username: deploy
//!     auth_method: password
//!     password: ${WEB_PASSWORD}
//!     allowed_commands: [ls, cat, "rsync*"]
//! defaults:
//!   timeout: 30
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::policy;
use crate::profile::{
    AuthMethod, ConnectionProfile, HostKeyCheck, PolicyMode, ProfileRegistry, Secret,
    DEFAULT_COMMAND_TIMEOUT, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_MAX_OUTPUT_BYTES, DEFAULT_PORT,
};
use crate::ssh::PoolSettings;

pub const CONFIG_FILE_NAME: &str = ".ssh-mcp-config.yaml";
pub const DEFAULT_KEY_PATH: &str = "~/.ssh/id_rsa";
const REDACTED: &str = "********";

static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("placeholder pattern is valid"));

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("configuration file {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("configuration must contain a 'connections' section")]
    MissingConnections,

    #[error("connection '{connection}': {message}")]
    InvalidConnection { connection: String, message: String },

    #[error("defaults: {0}")]
    InvalidDefaults(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthKind {
    #[default]
    Key,
    Password,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

/// One entry under `connections`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub hostname: String,
    pub username: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub auth_method: AuthKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_passphrase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_key_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub known_hosts: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub insecure_accept_any_host_key: bool,
    #[serde(default)]
    pub policy: PolicyMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,
    /// Command timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub timeout: u64,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub max_output_size: usize,
    pub allowed_commands: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_COMMAND_TIMEOUT.as_secs(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT.as_secs(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT.as_secs(),
            max_output_size: DEFAULT_MAX_OUTPUT_BYTES,
            allowed_commands: ["ls", "cat", "grep", "find", "ps", "top", "df", "du", "free"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub max_connections_per_profile: usize,
    pub max_idle_per_profile: usize,
    pub max_waiters_per_profile: usize,
    /// Seconds to wait for a free connection, 0 to fail fast
    pub acquire_timeout: u64,
    /// Seconds between idle sweeps, 0 to disable
    pub sweep_interval: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections_per_profile: 4,
            max_idle_per_profile: 2,
            max_waiters_per_profile: 64,
            acquire_timeout: 10,
            sweep_interval: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    connections: Option<BTreeMap<String, ConnectionConfig>>,
    #[serde(default)]
    pub defaults: Defaults,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Config {
    /// `~/.ssh-mcp-config.yaml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(CONFIG_FILE_NAME)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        tracing::debug!("Loading configuration from {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text)
    }

    /// Parse, substitute `${VAR}` placeholders, then validate
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let mut value: Value = serde_yaml::from_str(text)?;
        substitute_env(&mut value);

        let config: Config = serde_yaml::from_value(value)?;
        config.validate()?;
        Ok(config)
    }

    /// The configuration `init` writes: one example key-based connection
    pub fn default_template() -> Self {
        let example = ConnectionConfig {
            hostname: "example.com".into(),
            username: "user".into(),
            port: DEFAULT_PORT,
            auth_method: AuthKind::Key,
            key_path: Some(DEFAULT_KEY_PATH.into()),
            key_passphrase: None,
            password: None,
            host_key_fingerprint: None,
            known_hosts: None,
            insecure_accept_any_host_key: false,
            policy: PolicyMode::Strict,
            allowed_commands: None,
            timeout: None,
            connect_timeout: None,
            idle_timeout: None,
            max_output_size: None,
        };

        Self {
            connections: Some(BTreeMap::from([("example".to_string(), example)])),
            defaults: Defaults::default(),
            pool: PoolConfig::default(),
        }
    }

    /// Write the default template to `path`. An existing file is only
    /// replaced when `force` is set.
    pub fn init(path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }

        let yaml = Self::default_template().to_yaml()?;
        std::fs::write(path, yaml).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("Wrote default configuration to {}", path.display());
        Ok(())
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// A copy safe to print, with every credential replaced by `********`
    pub fn sanitized(&self) -> Self {
        let mut config = self.clone();
        for connection in config.connections.iter_mut().flat_map(|c| c.values_mut()) {
            if connection.password.is_some() {
                connection.password = Some(REDACTED.into());
            }
            if connection.key_passphrase.is_some() {
                connection.key_passphrase = Some(REDACTED.into());
            }
        }
        config
    }

    pub fn connections(&self) -> impl Iterator<Item = (&str, &ConnectionConfig)> {
        self.connections
            .iter()
            .flat_map(|c| c.iter())
            .map(|(id, connection)| (id.as_str(), connection))
    }

    pub fn connection(&self, id: &str) -> Option<&ConnectionConfig> {
        self.connections.as_ref()?.get(id)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let connections = self
            .connections
            .as_ref()
            .ok_or(ConfigError::MissingConnections)?;

        if self.defaults.max_output_size == 0 {
            return Err(ConfigError::InvalidDefaults(
                "max_output_size must be greater than zero".into(),
            ));
        }
        if self.defaults.timeout == 0 {
            return Err(ConfigError::InvalidDefaults(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.defaults.connect_timeout == 0 {
            return Err(ConfigError::InvalidDefaults(
                "connect_timeout must be greater than zero".into(),
            ));
        }
        if let Some(rule) = invalid_glob(&self.defaults.allowed_commands) {
            return Err(ConfigError::InvalidDefaults(format!(
                "invalid allowlist pattern {rule:?}"
            )));
        }

        for (id, connection) in connections {
            let invalid = |message: &str| ConfigError::InvalidConnection {
                connection: id.clone(),
                message: message.to_string(),
            };

            if connection.hostname.trim().is_empty() {
                return Err(invalid("hostname must not be empty"));
            }
            if connection.username.trim().is_empty() {
                return Err(invalid("username must not be empty"));
            }
            if connection.port == 0 {
                return Err(invalid("port must be greater than zero"));
            }
            if connection.auth_method == AuthKind::Password && connection.password.is_none() {
                return Err(invalid(
                    "missing required field 'password' for password authentication",
                ));
            }
            if connection.max_output_size == Some(0) {
                return Err(invalid("max_output_size must be greater than zero"));
            }
            if connection.timeout == Some(0) {
                return Err(invalid("timeout must be greater than zero"));
            }
            if connection.connect_timeout == Some(0) {
                return Err(invalid("connect_timeout must be greater than zero"));
            }
            if let Some(rule) = connection.allowed_commands.as_deref().and_then(invalid_glob) {
                return Err(invalid(&format!("invalid allowlist pattern {rule:?}")));
            }
        }

        Ok(())
    }

    /// Resolve every connection into a profile the runtime can use
    pub fn profiles(&self) -> Vec<ConnectionProfile> {
        self.connections()
            .map(|(id, connection)| self.resolve(id, connection))
            .collect()
    }

    pub fn registry(&self) -> ProfileRegistry {
        ProfileRegistry::new(self.profiles())
    }

    fn resolve(&self, id: &str, connection: &ConnectionConfig) -> ConnectionProfile {
        let defaults = &self.defaults;

        let auth = match connection.auth_method {
            AuthKind::Password => AuthMethod::Password {
                password: Secret::new(connection.password.clone().unwrap_or_default()),
            },
            AuthKind::Key => AuthMethod::Key {
                path: expand_path(connection.key_path.as_deref().unwrap_or(DEFAULT_KEY_PATH)),
                passphrase: connection.key_passphrase.clone().map(Secret::new),
            },
        };

        let host_key = if connection.insecure_accept_any_host_key {
            HostKeyCheck::InsecureAcceptAny
        } else if let Some(fingerprint) = &connection.host_key_fingerprint {
            HostKeyCheck::Fingerprint(fingerprint.clone())
        } else {
            connection
                .known_hosts
                .as_deref()
                .map(|path| HostKeyCheck::KnownHosts(expand_path(path)))
                .unwrap_or_default()
        };

        let allowed: Vec<&str> = connection
            .allowed_commands
            .as_ref()
            .unwrap_or(&defaults.allowed_commands)
            .iter()
            .map(String::as_str)
            .collect();

        ConnectionProfile::builder()
            .id(id)
            .hostname(connection.hostname.clone())
            .port(connection.port)
            .username(connection.username.clone())
            .auth(auth)
            .host_key(host_key)
            .connect_timeout(secs(connection.connect_timeout, defaults.connect_timeout))
            .idle_timeout(secs(connection.idle_timeout, defaults.idle_timeout))
            .command_timeout(secs(connection.timeout, defaults.timeout))
            .max_output_bytes(connection.max_output_size.unwrap_or(defaults.max_output_size))
            .allowed_commands(&allowed)
            .policy_mode(connection.policy)
            .build()
    }

    pub fn pool_settings(&self) -> PoolSettings {
        let sweep_interval =
            (self.pool.sweep_interval > 0).then(|| Duration::from_secs(self.pool.sweep_interval));

        PoolSettings::builder()
            .max_connections_per_profile(self.pool.max_connections_per_profile.max(1))
            .max_idle_per_profile(self.pool.max_idle_per_profile)
            .max_waiters_per_profile(self.pool.max_waiters_per_profile)
            .sweep_interval(sweep_interval)
            .build()
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.pool.acquire_timeout)
    }
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}

fn invalid_glob(rules: &[String]) -> Option<&str> {
    rules
        .iter()
        .find(|rule| policy::is_glob_rule(rule) && glob::Pattern::new(rule).is_err())
        .map(String::as_str)
}

fn substitute_env(value: &mut Value) {
    match value {
        Value::String(text) => {
            if PLACEHOLDER.is_match(text) {
                *text = PLACEHOLDER
                    .replace_all(text, |caps: &Captures| {
                        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
                    })
                    .into_owned();
            }
        }
        Value::Sequence(items) => items.iter_mut().for_each(substitute_env),
        Value::Mapping(map) => map.values_mut().for_each(substitute_env),
        Value::Tagged(tagged) => substitute_env(&mut tagged.value),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}
