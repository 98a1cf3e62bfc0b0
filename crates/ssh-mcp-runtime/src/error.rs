//! Error taxonomy for connection management and command execution
//!
//! Every variant carries the profile id it happened on. Variants produced while
//! running a command also carry the command text. Nothing here ever holds
//! credential material: authentication failures only name the method that was
//! attempted.

use std::time::Duration;

use crate::execution::ExecutionResult;
use crate::policy::DenyReason;

pub type Result<T, E = ExecError> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("unknown connection profile '{profile}'")]
    UnknownProfile { profile: String },

    #[error("command '{command}' is not allowed on '{profile}': {reason}")]
    CommandNotAllowed {
        profile: String,
        command: String,
        reason: DenyReason,
    },

    #[error("connection pool for '{profile}' is exhausted")]
    PoolExhausted { profile: String },

    #[error("timed out after {waited:?} waiting for a connection to '{profile}'")]
    AcquireTimeout { profile: String, waited: Duration },

    #[error("connection pool is shutting down")]
    PoolClosed { profile: String },

    #[error("{method} authentication failed for '{profile}'")]
    Authentication {
        profile: String,
        method: &'static str,
    },

    #[error("host key for '{profile}' does not match ({presented}): {detail}")]
    HostKeyMismatch {
        profile: String,
        presented: String,
        detail: String,
    },

    #[error("timed out after {timeout:?} connecting to '{profile}'")]
    ConnectTimeout { profile: String, timeout: Duration },

    #[error("command '{command}' on '{profile}' exceeded its {timeout:?} timeout")]
    ExecutionTimeout {
        profile: String,
        command: String,
        timeout: Duration,
        partial: Box<ExecutionResult>,
    },

    #[error("connection error on '{profile}': {message}")]
    Connection { profile: String, message: String },
}

impl ExecError {
    pub(crate) fn connection(profile: &str, message: impl ToString) -> Self {
        Self::Connection {
            profile: profile.to_string(),
            message: message.to_string(),
        }
    }

    /// Profile the error happened on
    pub fn profile(&self) -> &str {
        match self {
            Self::UnknownProfile { profile }
            | Self::CommandNotAllowed { profile, .. }
            | Self::PoolExhausted { profile }
            | Self::AcquireTimeout { profile, .. }
            | Self::PoolClosed { profile }
            | Self::Authentication { profile, .. }
            | Self::HostKeyMismatch { profile, .. }
            | Self::ConnectTimeout { profile, .. }
            | Self::ExecutionTimeout { profile, .. }
            | Self::Connection { profile, .. } => profile,
        }
    }

    /// Whether a caller may retry the whole operation, ideally with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. }
                | Self::AcquireTimeout { .. }
                | Self::ConnectTimeout { .. }
                | Self::ExecutionTimeout { .. }
                | Self::Connection { .. }
        )
    }

    /// Partial output captured before a timeout, if any
    pub fn partial_result(&self) -> Option<&ExecutionResult> {
        match self {
            Self::ExecutionTimeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = [
            ExecError::PoolExhausted {
                profile: "web".into(),
            },
            ExecError::AcquireTimeout {
                profile: "web".into(),
                waited: Duration::from_secs(1),
            },
            ExecError::ConnectTimeout {
                profile: "web".into(),
                timeout: Duration::from_secs(1),
            },
        ];
        for err in &transient {
            assert!(err.is_transient(), "{err} should be transient");
        }

        let fatal = [
            ExecError::PoolClosed {
                profile: "web".into(),
            },
            ExecError::Authentication {
                profile: "web".into(),
                method: "password",
            },
            ExecError::HostKeyMismatch {
                profile: "web".into(),
                presented: "SHA256:abc".into(),
                detail: "pinned fingerprint differs".into(),
            },
            ExecError::CommandNotAllowed {
                profile: "web".into(),
                command: "rm -rf /".into(),
                reason: DenyReason::NotInAllowlist("rm".into()),
            },
        ];
        for err in &fatal {
            assert!(!err.is_transient(), "{err} should not be transient");
        }
    }

    #[test]
    fn test_error_messages_name_profile_and_command() {
        let err = ExecError::CommandNotAllowed {
            profile: "db".into(),
            command: "rm -rf /".into(),
            reason: DenyReason::NotInAllowlist("rm".into()),
        };
        let message = err.to_string();
        assert!(message.contains("'rm -rf /'"));
        assert!(message.contains("'db'"));
        assert_eq!(err.profile(), "db");
    }
}
