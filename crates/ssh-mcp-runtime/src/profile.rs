//! Connection profiles: the static description of one remote host and the
//! policy commands on it run under.
//!
//! Profiles arrive fully resolved (placeholders substituted, paths expanded)
//! and are never mutated by the runtime.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

pub const DEFAULT_PORT: u16 = 22;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 1024 * 1024;

/// A credential that must never be printed
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw value. Only the authentication code should call this.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(********)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("********")
    }
}

/// How to authenticate against the host. Exactly one method per profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMethod {
    Key {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
    Password {
        password: Secret,
    },
}

impl AuthMethod {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Key { .. } => "public key",
            Self::Password { .. } => "password",
        }
    }
}

/// How the server's host key is verified
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyCheck {
    /// A pinned fingerprint, e.g. `SHA256:nThbg6kXUpJWGl7E1IGOCspRomTxdCARLviKw6E5SY8`
    Fingerprint(String),
    /// An OpenSSH known_hosts file
    KnownHosts(PathBuf),
    /// Accept whatever key the server presents. Must be opted into explicitly.
    InsecureAcceptAny,
}

impl HostKeyCheck {
    pub fn default_known_hosts() -> PathBuf {
        dirs::home_dir()
            .map(|home| home.join(".ssh").join("known_hosts"))
            .unwrap_or_else(|| PathBuf::from(".ssh/known_hosts"))
    }
}

impl Default for HostKeyCheck {
    fn default() -> Self {
        Self::KnownHosts(Self::default_known_hosts())
    }
}

/// Whether shell metacharacters may appear in commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyMode {
    /// Single, unchained commands only
    #[default]
    Strict,
    /// Metacharacters allowed; only the leading executable is checked
    Raw,
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct ConnectionProfile {
    #[builder(setter(into))]
    pub id: String,
    #[builder(setter(into))]
    pub hostname: String,
    #[builder(default = DEFAULT_PORT)]
    pub port: u16,
    #[builder(setter(into))]
    pub username: String,
    pub auth: AuthMethod,
    #[builder(default)]
    pub host_key: HostKeyCheck,
    #[builder(default = DEFAULT_CONNECT_TIMEOUT)]
    pub connect_timeout: Duration,
    #[builder(default = DEFAULT_IDLE_TIMEOUT)]
    pub idle_timeout: Duration,
    #[builder(default = DEFAULT_COMMAND_TIMEOUT)]
    pub command_timeout: Duration,
    #[builder(default = DEFAULT_MAX_OUTPUT_BYTES)]
    pub max_output_bytes: usize,
    #[builder(default, setter(transform = |commands: &[&str]| commands.iter().map(|c| c.to_string()).collect()))]
    pub allowed_commands: BTreeSet<String>,
    #[builder(default)]
    pub policy_mode: PolicyMode,
}

impl ConnectionProfile {
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id.clone(),
            hostname: self.hostname.clone(),
            port: self.port,
            username: self.username.clone(),
        }
    }

    /// `host:port`, as passed to the TCP connect
    pub fn address(&self) -> (String, u16) {
        (self.hostname.clone(), self.port)
    }
}

/// Public view of a profile, safe to hand to any caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub hostname: String,
    pub port: u16,
    pub username: String,
}

/// The set of profiles a pool and executor work against, keyed by id
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, Arc<ConnectionProfile>>,
}

impl ProfileRegistry {
    pub fn new(profiles: impl IntoIterator<Item = ConnectionProfile>) -> Self {
        Self {
            profiles: profiles
                .into_iter()
                .map(|profile| (profile.id.clone(), Arc::new(profile)))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<ConnectionProfile>> {
        self.profiles.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn list(&self) -> Vec<ProfileSummary> {
        self.profiles.values().map(|p| p.summary()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
