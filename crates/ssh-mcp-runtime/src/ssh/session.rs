// Handle making SSH connections for a profile. Do not manage or pool them, just handle the actual plumbing.
// This is essentially a wrapper around the russh crate.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use russh::client::Handle;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg, PublicKey};
use russh::{ChannelMsg, Disconnect};
use tokio::time::timeout;

use crate::error::{ExecError, Result};
use crate::profile::{AuthMethod, ConnectionProfile, HostKeyCheck};
use crate::ssh::transport::{ChannelEvent, Connector, ExecChannel, Transport};

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_MAX: usize = 3;

/// Outcome of the host key check, recorded by the handler so a rejected
/// handshake can be reported as a mismatch rather than a generic failure
#[derive(Debug, Clone, PartialEq, Eq)]
enum HostKeyVerdict {
    Accepted,
    Rejected { presented: String, detail: String },
}

/// SSH client handler for russh
pub struct Client {
    host: String,
    port: u16,
    check: HostKeyCheck,
    verdict: Arc<Mutex<Option<HostKeyVerdict>>>,
}

impl russh::client::Handler for Client {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let verdict = verify_host_key(&self.check, &self.host, self.port, server_public_key);
        let accepted = verdict == HostKeyVerdict::Accepted;
        if let Ok(mut slot) = self.verdict.lock() {
            *slot = Some(verdict);
        }
        Ok(accepted)
    }
}

fn normalize_fingerprint(fingerprint: &str) -> String {
    let fingerprint = fingerprint.trim();
    let body = fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint);
    format!("SHA256:{}", body.trim_end_matches('='))
}

fn verify_host_key(check: &HostKeyCheck, host: &str, port: u16, key: &PublicKey) -> HostKeyVerdict {
    let presented = key.fingerprint(HashAlg::Sha256).to_string();

    match check {
        HostKeyCheck::InsecureAcceptAny => {
            tracing::warn!("Accepting host key {presented} for {host}:{port} without verification");
            HostKeyVerdict::Accepted
        }
        HostKeyCheck::Fingerprint(pinned) => {
            if normalize_fingerprint(pinned) == presented {
                HostKeyVerdict::Accepted
            } else {
                HostKeyVerdict::Rejected {
                    presented,
                    detail: "pinned fingerprint differs".to_string(),
                }
            }
        }
        HostKeyCheck::KnownHosts(path) => check_known_hosts(host, port, key, path, presented),
    }
}

fn check_known_hosts(
    host: &str,
    port: u16,
    key: &PublicKey,
    path: &Path,
    presented: String,
) -> HostKeyVerdict {
    match russh::keys::check_known_hosts_path(host, port, key, path) {
        Ok(true) => HostKeyVerdict::Accepted,
        Ok(false) => HostKeyVerdict::Rejected {
            presented,
            detail: format!("host is not listed in {}", path.display()),
        },
        Err(russh::keys::Error::KeyChanged { line }) => HostKeyVerdict::Rejected {
            presented,
            detail: format!("key differs from {}:{line}", path.display()),
        },
        Err(e) => HostKeyVerdict::Rejected {
            presented,
            detail: format!("cannot check {}: {e}", path.display()),
        },
    }
}

/// Opens russh sessions for profiles
pub struct SshConnector {
    config: Arc<russh::client::Config>,
}

impl Default for SshConnector {
    fn default() -> Self {
        SshConnector::new()
    }
}

impl SshConnector {
    pub fn new() -> Self {
        let config = russh::client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        };

        SshConnector {
            config: Arc::new(config),
        }
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn Transport>> {
        let session = Session::open(profile, self.config.clone()).await?;
        Ok(Box::new(session))
    }
}

/// An authenticated ssh session, wrapping the underlying russh handle
pub struct Session {
    session: Handle<Client>,
    profile_id: String,
}

impl Session {
    /// Connect and authenticate within the profile's connect timeout
    pub async fn open(
        profile: &ConnectionProfile,
        config: Arc<russh::client::Config>,
    ) -> Result<Self> {
        tracing::debug!(
            "Connecting to {}@{}:{} for profile {}",
            profile.username,
            profile.hostname,
            profile.port,
            profile.id
        );

        match timeout(profile.connect_timeout, Self::open_inner(profile, config)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    "Connecting to {} timed out after {:?}",
                    profile.id,
                    profile.connect_timeout
                );
                Err(ExecError::ConnectTimeout {
                    profile: profile.id.clone(),
                    timeout: profile.connect_timeout,
                })
            }
        }
    }

    async fn open_inner(
        profile: &ConnectionProfile,
        config: Arc<russh::client::Config>,
    ) -> Result<Self> {
        let verdict = Arc::new(Mutex::new(None));
        let client = Client {
            host: profile.hostname.clone(),
            port: profile.port,
            check: profile.host_key.clone(),
            verdict: verdict.clone(),
        };

        let connected = russh::client::connect(config, profile.address(), client).await;

        // A rejected host key surfaces from russh as a generic error, so the
        // handler's verdict takes precedence over whatever russh returned.
        let rejected = verdict.lock().ok().and_then(|slot| match slot.clone() {
            Some(HostKeyVerdict::Rejected { presented, detail }) => Some((presented, detail)),
            _ => None,
        });
        if let Some((presented, detail)) = rejected {
            tracing::error!("Host key check failed for {}: {detail}", profile.id);
            return Err(ExecError::HostKeyMismatch {
                profile: profile.id.clone(),
                presented,
                detail,
            });
        }

        let mut session = Session {
            session: connected.map_err(|e| ExecError::connection(&profile.id, e))?,
            profile_id: profile.id.clone(),
        };

        session.authenticate(profile).await?;
        tracing::info!(
            "Connected to {}@{}:{} ({})",
            profile.username,
            profile.hostname,
            profile.port,
            profile.id
        );

        Ok(session)
    }

    /// Authenticate with exactly the method on the profile. There is no
    /// fallback to an agent, default keys or another method.
    async fn authenticate(&mut self, profile: &ConnectionProfile) -> Result<()> {
        let username = profile.username.as_str();

        let auth_res = match &profile.auth {
            AuthMethod::Password { password } => {
                tracing::debug!("Trying password authentication for {username}");
                self.session
                    .authenticate_password(username, password.expose())
                    .await
            }
            AuthMethod::Key { path, passphrase } => {
                tracing::debug!("Trying public key authentication with {}", path.display());
                let key_pair = russh::keys::load_secret_key(
                    path,
                    passphrase.as_ref().map(|secret| secret.expose()),
                )
                .map_err(|e| {
                    tracing::warn!("Failed to load key {}: {e}", path.display());
                    ExecError::Authentication {
                        profile: profile.id.clone(),
                        method: profile.auth.name(),
                    }
                })?;

                // Query the server for the best RSA hash algorithm it supports
                let best_hash = self
                    .session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(|e| ExecError::connection(&profile.id, e))?
                    .flatten();
                let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key_pair), best_hash);

                self.session
                    .authenticate_publickey(username, key_with_alg)
                    .await
            }
        }
        .map_err(|e| ExecError::connection(&profile.id, e))?;

        match auth_res {
            russh::client::AuthResult::Success => Ok(()),
            russh::client::AuthResult::Failure {
                remaining_methods,
                partial_success,
            } => {
                tracing::warn!(
                    "Server rejected {} authentication for {} (remaining methods: {:?}, partial: {})",
                    profile.auth.name(),
                    profile.id,
                    remaining_methods,
                    partial_success
                );
                Err(ExecError::Authentication {
                    profile: profile.id.clone(),
                    method: profile.auth.name(),
                })
            }
        }
    }
}

#[async_trait]
impl Transport for Session {
    async fn open_exec_channel(&self, command: &str) -> Result<Box<dyn ExecChannel>> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| ExecError::connection(&self.profile_id, e))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| ExecError::connection(&self.profile_id, e))?;

        Ok(Box::new(SshExecChannel {
            channel,
            profile_id: self.profile_id.clone(),
        }))
    }

    fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    async fn close(&self) -> Result<()> {
        self.session
            .disconnect(Disconnect::ByApplication, "", "")
            .await
            .map_err(|e| ExecError::connection(&self.profile_id, e))
    }
}

struct SshExecChannel {
    channel: russh::Channel<russh::client::Msg>,
    profile_id: String,
}

#[async_trait]
impl ExecChannel for SshExecChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        loop {
            let msg = self.channel.wait().await?;

            match msg {
                ChannelMsg::Data { data } => {
                    return Some(ChannelEvent::Stdout(Bytes::copy_from_slice(&data)))
                }
                ChannelMsg::ExtendedData { data, ext: 1 } => {
                    return Some(ChannelEvent::Stderr(Bytes::copy_from_slice(&data)))
                }
                // ExitStatus does NOT guarantee all Data messages have been
                // delivered (RFC 4254 §6.10), the reader keeps going until Eof.
                ChannelMsg::ExitStatus { exit_status } => {
                    return Some(ChannelEvent::ExitStatus(exit_status))
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    return Some(ChannelEvent::ExitSignal(format!("{signal_name:?}")))
                }
                ChannelMsg::Eof => return Some(ChannelEvent::Eof),
                ChannelMsg::Close => return None,
                other => {
                    tracing::trace!("Ignoring channel message {other:?}");
                }
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.channel
            .close()
            .await
            .map_err(|e| ExecError::connection(&self.profile_id, e))
    }
}
