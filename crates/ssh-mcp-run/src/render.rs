//! Rendering of execution results for the terminal
//!
//! Plain mode writes the remote output verbatim so it can be piped, and adds
//! notes about truncation or timeouts on stderr. JSON mode prints one object.

use std::io::{self, Write};

use serde::Serialize;
use ssh_mcp_runtime::{ExecutionResult, ProfileSummary};

/// Exit code used when the remote command ran out of time, as timeout(1) does
pub const TIMEOUT_EXIT_CODE: u8 = 124;

#[derive(Serialize)]
pub struct JsonReport<'a> {
    pub connection: &'a str,
    pub command: &'a str,
    #[serde(flatten)]
    pub result: &'a ExecutionResult,
}

pub fn text(result: &ExecutionResult, out: &mut impl Write, err: &mut impl Write) -> io::Result<()> {
    out.write_all(&result.stdout)?;
    out.flush()?;
    err.write_all(&result.stderr)?;

    if result.truncated {
        writeln!(err, "[output truncated]")?;
    }
    if result.timed_out {
        writeln!(err, "[command timed out after {}ms]", result.duration_ms)?;
    }
    if let Some(signal) = &result.exit_signal {
        writeln!(err, "[terminated by signal {signal}]")?;
    }
    err.flush()
}

pub fn json(report: &JsonReport<'_>, out: &mut impl Write) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report)?;
    writeln!(out)
}

pub fn connections(profiles: &[ProfileSummary], out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Available connections:")?;
    for profile in profiles {
        writeln!(
            out,
            "- {}  {}@{}:{}",
            profile.id, profile.username, profile.hostname, profile.port
        )?;
    }
    Ok(())
}

pub fn commands<'a>(commands: impl IntoIterator<Item = &'a str>, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Allowed commands:")?;
    for command in commands {
        writeln!(out, "- {command}")?;
    }
    Ok(())
}

/// Process exit code mirroring the remote one
pub fn exit_code(result: &ExecutionResult) -> u8 {
    if result.timed_out {
        return TIMEOUT_EXIT_CODE;
    }
    match result.exit_code {
        Some(code) => u8::try_from(code & 0xff).unwrap_or(1),
        None => 1,
    }
}
