// The seam between the pool/executor and the actual SSH plumbing. The russh
// implementation lives in `session.rs`; tests plug in a scripted one.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::profile::ConnectionProfile;

/// One message read from an exec channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Stdout(Bytes),
    Stderr(Bytes),
    ExitStatus(u32),
    ExitSignal(String),
    Eof,
}

/// Establishes authenticated transports for profiles
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect and authenticate. Implementations must give up after
    /// `profile.connect_timeout` and report it as `ExecError::ConnectTimeout`.
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn Transport>>;
}

/// An authenticated session able to carry many channels, one at a time here
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a single-use channel running `command`
    async fn open_exec_channel(&self, command: &str) -> Result<Box<dyn ExecChannel>>;

    /// Whether the underlying session has gone away
    fn is_closed(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// A channel bound to exactly one remote command
#[async_trait]
pub trait ExecChannel: Send {
    /// Next message from the remote side, `None` once the channel is closed
    async fn next_event(&mut self) -> Option<ChannelEvent>;

    async fn close(&mut self) -> Result<()>;
}
