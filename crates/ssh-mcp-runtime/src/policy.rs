//! Command allowlist
//!
//! Default-deny: a command runs only if its leading executable token matches
//! an entry of the profile's `allowed_commands`, either exactly or through an
//! explicit glob entry such as `rsync*`. Matching is case-sensitive.
//!
//! In [`PolicyMode::Strict`] any shell metacharacter anywhere in the command
//! rejects it outright, so only single, unchained commands get through.
//! [`PolicyMode::Raw`] lifts that restriction and checks only the leading
//! executable.

use std::fmt;

use crate::profile::{ConnectionProfile, PolicyMode};

/// Characters that chain, substitute or redirect commands in a POSIX shell
const METACHARACTERS: &[char] = &[';', '|', '&', '`', '>', '<', '\n', '\r'];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    EmptyCommand,
    ShellMetacharacter(String),
    NotInAllowlist(String),
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => write!(f, "empty command"),
            Self::ShellMetacharacter(found) => {
                write!(f, "shell metacharacter {found:?} is not permitted")
            }
            Self::NotInAllowlist(token) => write!(f, "'{token}' is not in the allowlist"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowlistDecision {
    pub allowed: bool,
    pub matched_rule: Option<String>,
    pub reason: Option<DenyReason>,
}

impl AllowlistDecision {
    fn allow(rule: &str) -> Self {
        Self {
            allowed: true,
            matched_rule: Some(rule.to_string()),
            reason: None,
        }
    }

    fn deny(reason: DenyReason) -> Self {
        Self {
            allowed: false,
            matched_rule: None,
            reason: Some(reason),
        }
    }
}

/// Decide whether `command` may run on `profile`
pub fn is_allowed(profile: &ConnectionProfile, command: &str) -> AllowlistDecision {
    let command = command.trim();
    if command.is_empty() {
        return AllowlistDecision::deny(DenyReason::EmptyCommand);
    }

    let token = match profile.policy_mode {
        PolicyMode::Strict => {
            if let Some(found) = find_metacharacter(command) {
                return AllowlistDecision::deny(DenyReason::ShellMetacharacter(found));
            }
            command.split_whitespace().next().unwrap_or_default()
        }
        PolicyMode::Raw => command
            .split(|c: char| c.is_whitespace() || METACHARACTERS.contains(&c) || c == '(')
            .next()
            .unwrap_or_default(),
    };

    if token.is_empty() {
        return AllowlistDecision::deny(DenyReason::EmptyCommand);
    }

    match profile
        .allowed_commands
        .iter()
        .find(|rule| rule_matches(rule, token))
    {
        Some(rule) => AllowlistDecision::allow(rule),
        None => AllowlistDecision::deny(DenyReason::NotInAllowlist(token.to_string())),
    }
}

/// Entries containing glob syntax are matched as patterns, everything else exactly
pub fn is_glob_rule(rule: &str) -> bool {
    rule.contains(['*', '?', '['])
}

fn rule_matches(rule: &str, token: &str) -> bool {
    if is_glob_rule(rule) {
        match glob::Pattern::new(rule) {
            Ok(pattern) => pattern.matches(token),
            Err(e) => {
                tracing::warn!("Ignoring invalid allowlist pattern {rule:?}: {e}");
                false
            }
        }
    } else {
        rule == token
    }
}

fn find_metacharacter(command: &str) -> Option<String> {
    if command.contains("$(") {
        return Some("$(".to_string());
    }
    command
        .chars()
        .find(|c| METACHARACTERS.contains(c))
        .map(|c| c.to_string())
}
