//! SSH connection pooling and management
//!
//! Connections are established once per profile and reused across commands.
//! The pool only ever talks to the network through the [`Connector`] seam;
//! [`SshConnector`] is the russh implementation.
//!
//! Features:
//! - Per-profile connection limits with bounded waiting
//! - Idle eviction, both on acquire and from a background sweep
//! - Password and public key authentication
//! - Host key verification against a pinned fingerprint or known_hosts

mod connection;
mod pool;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod mock;


pub use connection::Connection;
pub(crate) use pool::deadline_after;
pub use pool::{ConnectionPool, PoolSettings, PoolStats, PooledConnection};
pub use session::{Session, SshConnector};
pub use transport::{ChannelEvent, Connector, ExecChannel, Transport};
