//! Runtime library for ssh-mcp
//!
//! This crate runs allowlisted commands on remote hosts over pooled SSH
//! connections. It includes:
//!
//! - Connection profiles and the YAML configuration they are loaded from
//! - A default-deny command allowlist
//! - A per-profile SSH connection pool with bounded waiting and idle eviction
//! - A command executor with output caps and wall-clock deadlines
//!
//! # Example
//!
//! The typical flow for using this crate involves:
//! 1. Loading a [`config::Config`] and resolving it into a [`profile::ProfileRegistry`]
//! 2. Creating one [`ssh::ConnectionPool`] for the process
//! 3. Handing the pool to a [`execution::CommandExecutor`] and calling `execute`
//! 4. Shutting the pool down before exit
//!
//! ```ignore
//! let config = Config::load(&Config::default_path())?;
//! let pool = ConnectionPool::new(&config.registry(), Arc::new(SshConnector::new()), config.pool_settings());
//! let executor = CommandExecutor::new(Arc::new(pool));
//! let result = executor.execute("web", "ls -la /srv", None).await?;
//! ```

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber for standalone logging to the terminal.
///
/// Logs go to stderr, so command output on stdout stays clean. The level is
/// controlled by the `RUST_LOG` environment variable and defaults to `info`.
///
/// `tracing` is built with its `log` feature, so an embedding application
/// that has a `log` backend but no tracing subscriber still sees events from
/// this crate. Only call this when nothing else has set up logging.
///
/// # Examples
///
/// ```ignore
/// // Set RUST_LOG=ssh_mcp_runtime=debug to see pool bookkeeping
/// ssh_mcp_runtime::init_tracing();
/// ```
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

pub mod config;
pub mod error;
pub mod execution;
pub mod policy;
pub mod profile;
pub mod ssh;

pub use config::{Config, ConfigError};
pub use error::{ExecError, Result};
pub use execution::{CommandExecutor, ExecutionRequest, ExecutionResult};
pub use policy::{is_allowed, AllowlistDecision, DenyReason};
pub use profile::{AuthMethod, ConnectionProfile, HostKeyCheck, PolicyMode, ProfileRegistry, ProfileSummary, Secret};
pub use ssh::{ConnectionPool, PoolSettings, PoolStats, SshConnector};
