//! Command execution over pooled connections
//!
//! [`CommandExecutor`] is the single entry point callers use to run a command
//! on a remote host. Each call:
//!
//! 1. checks the command against the profile's allowlist,
//! 2. checks a connection out of the [`ConnectionPool`],
//! 3. runs the command on a fresh exec channel, capturing stdout and stderr up
//!    to the profile's byte cap, under a wall-clock deadline,
//! 4. hands the connection back, healthy or not.
//!
//! A nonzero exit status is part of the result, never an error.

use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};
use tokio::time::{timeout_at, Instant};
use typed_builder::TypedBuilder;

use crate::error::{ExecError, Result};
use crate::policy::{self, AllowlistDecision, DenyReason};
use crate::profile::{ConnectionProfile, ProfileSummary};
use crate::ssh::{deadline_after, ChannelEvent, ConnectionPool, ExecChannel, PooledConnection};

pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, TypedBuilder)]
pub struct ExecutionRequest {
    #[builder(setter(into))]
    pub profile_id: String,
    #[builder(setter(into))]
    pub command: String,
    /// Replaces the profile's `command_timeout` for this call
    #[builder(default, setter(strip_option))]
    pub timeout: Option<Duration>,
}

/// Output and status of one remote command
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    #[serde(serialize_with = "lossy_utf8")]
    pub stdout: Vec<u8>,
    #[serde(serialize_with = "lossy_utf8")]
    pub stderr: Vec<u8>,
    /// `None` when the command timed out or was killed by a signal
    pub exit_code: Option<i32>,
    pub exit_signal: Option<String>,
    /// Set when either stream went over the profile's byte cap
    pub truncated: bool,
    pub duration_ms: u64,
    pub timed_out: bool,
}

impl ExecutionResult {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }

    pub fn success(&self) -> bool {
        !self.timed_out && self.exit_code == Some(0)
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

fn lossy_utf8<S: Serializer>(bytes: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(bytes))
}

/// Accumulates one output stream, keeping at most `cap` bytes
#[derive(Debug)]
struct CappedBuffer {
    data: Vec<u8>,
    cap: usize,
    truncated: bool,
}

impl CappedBuffer {
    fn new(cap: usize) -> Self {
        Self {
            data: Vec::new(),
            cap,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.cap.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }
}

/// Everything read off a channel before it finished or the deadline hit
struct Capture {
    stdout: CappedBuffer,
    stderr: CappedBuffer,
    exit_code: Option<i32>,
    exit_signal: Option<String>,
    timed_out: bool,
}

impl Capture {
    fn into_result(self, elapsed: Duration) -> ExecutionResult {
        ExecutionResult {
            truncated: self.stdout.truncated || self.stderr.truncated,
            stdout: self.stdout.data,
            stderr: self.stderr.data,
            exit_code: if self.timed_out { None } else { self.exit_code },
            exit_signal: self.exit_signal,
            duration_ms: elapsed_ms(elapsed),
            timed_out: self.timed_out,
        }
    }
}

/// Read a channel until the remote command finishes or `deadline` passes.
///
/// Output past the cap is discarded but still read, so the remote side never
/// blocks on a full window.
async fn read_channel(channel: &mut dyn ExecChannel, cap: usize, deadline: Instant) -> Capture {
    let mut capture = Capture {
        stdout: CappedBuffer::new(cap),
        stderr: CappedBuffer::new(cap),
        exit_code: None,
        exit_signal: None,
        timed_out: false,
    };
    let mut eof = false;

    let expired = tokio::time::sleep_until(deadline);
    tokio::pin!(expired);

    loop {
        tokio::select! {
            _ = &mut expired => {
                capture.timed_out = true;
                break;
            }
            event = channel.next_event() => {
                let finished = capture.exit_code.is_some() || capture.exit_signal.is_some();
                match event {
                    Some(ChannelEvent::Stdout(data)) => capture.stdout.push(&data),
                    Some(ChannelEvent::Stderr(data)) => capture.stderr.push(&data),
                    Some(ChannelEvent::ExitStatus(code)) => {
                        capture.exit_code = Some(i32::try_from(code).unwrap_or(i32::MAX));
                        if eof {
                            break;
                        }
                    }
                    Some(ChannelEvent::ExitSignal(signal)) => {
                        capture.exit_signal = Some(signal);
                        if eof {
                            break;
                        }
                    }
                    Some(ChannelEvent::Eof) => {
                        eof = true;
                        if finished {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    capture
}

/// Runs allowlisted commands on the hosts of a shared [`ConnectionPool`].
/// Cheap to clone; every clone uses the same pool.
#[derive(Clone)]
pub struct CommandExecutor {
    pool: Arc<ConnectionPool>,
    acquire_timeout: Duration,
}

impl CommandExecutor {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            pool,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// How long `execute` waits for a connection on a saturated profile.
    /// Zero fails fast with `PoolExhausted`.
    pub fn with_acquire_timeout(mut self, acquire_timeout: Duration) -> Self {
        self.acquire_timeout = acquire_timeout;
        self
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn list_profiles(&self) -> Vec<ProfileSummary> {
        self.pool.list_profiles()
    }

    fn profile(&self, profile_id: &str) -> Result<Arc<ConnectionProfile>> {
        self.pool
            .profile(profile_id)
            .ok_or_else(|| ExecError::UnknownProfile {
                profile: profile_id.to_string(),
            })
    }

    /// Evaluate the allowlist without running anything
    pub fn check(&self, profile_id: &str, command: &str) -> Result<AllowlistDecision> {
        let profile = self.profile(profile_id)?;
        Ok(policy::is_allowed(&profile, command))
    }

    pub async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        self.execute(&request.profile_id, &request.command, request.timeout)
            .await
    }

    /// Run `command` on `profile_id`. A command that outlives its deadline
    /// still returns `Ok`, with `timed_out` set and whatever output arrived.
    pub async fn execute(
        &self,
        profile_id: &str,
        command: &str,
        timeout_override: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let profile = self.profile(profile_id)?;

        let decision = policy::is_allowed(&profile, command);
        if !decision.allowed {
            let reason = decision.reason.unwrap_or(DenyReason::EmptyCommand);
            tracing::warn!("Refusing command on {profile_id}: {reason}");
            return Err(ExecError::CommandNotAllowed {
                profile: profile_id.to_string(),
                command: command.to_string(),
                reason,
            });
        }

        let conn = self
            .pool
            .acquire(profile_id, self.acquire_timeout)
            .await
            .inspect_err(|e| {
                tracing::warn!("Could not get a connection to run {command:?} on {profile_id}: {e}")
            })?;

        let timeout = timeout_override.unwrap_or(profile.command_timeout);
        self.run_on(conn, command, timeout, profile.max_output_bytes)
            .await
    }

    async fn run_on(
        &self,
        conn: PooledConnection,
        command: &str,
        timeout: Duration,
        max_output_bytes: usize,
    ) -> Result<ExecutionResult> {
        let profile_id = conn.profile_id().to_string();
        tracing::debug!("Executing {command:?} on {profile_id} via connection {}", conn.id());

        // The deadline also covers waiting for the server to confirm the channel
        let started = Instant::now();
        let deadline = deadline_after(started, timeout);

        let opened = timeout_at(deadline, conn.transport().open_exec_channel(command)).await;
        let mut channel = match opened {
            Ok(Ok(channel)) => channel,
            Ok(Err(e)) => {
                tracing::error!("Failed to open channel for {command:?} on {profile_id}: {e}");
                self.pool.release(conn, false).await;
                return Err(e);
            }
            Err(_) => {
                tracing::warn!("Opening a channel for {command:?} on {profile_id} timed out after {timeout:?}");
                self.pool.release(conn, false).await;
                return Ok(ExecutionResult {
                    duration_ms: elapsed_ms(started.elapsed()),
                    timed_out: true,
                    ..Default::default()
                });
            }
        };

        let capture = read_channel(channel.as_mut(), max_output_bytes, deadline).await;
        let timed_out = capture.timed_out;
        let result = capture.into_result(started.elapsed());

        let closed_cleanly = match channel.close().await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("Closing channel on {profile_id} failed: {e}");
                false
            }
        };

        let healthy = !timed_out && closed_cleanly && !conn.transport().is_closed();
        if timed_out {
            tracing::warn!("Command {command:?} on {profile_id} timed out after {timeout:?}");
        } else {
            tracing::debug!(
                "Command {command:?} on {profile_id} exited with {:?} in {}ms",
                result.exit_code,
                result.duration_ms
            );
        }

        self.pool.release(conn, healthy).await;
        Ok(result)
    }

    /// Like [`execute`](Self::execute), but a timeout comes back as
    /// `ExecError::ExecutionTimeout` carrying the partial result.
    pub async fn execute_checked(
        &self,
        profile_id: &str,
        command: &str,
        timeout_override: Option<Duration>,
    ) -> Result<ExecutionResult> {
        let result = self.execute(profile_id, command, timeout_override).await?;
        if !result.timed_out {
            return Ok(result);
        }

        let timeout = match timeout_override {
            Some(timeout) => timeout,
            None => self
                .pool
                .profile(profile_id)
                .map(|profile| profile.command_timeout)
                .unwrap_or_default(),
        };

        Err(ExecError::ExecutionTimeout {
            profile: profile_id.to_string(),
            command: command.to_string(),
            timeout,
            partial: Box::new(result),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::ProfileRegistry;
    use crate::ssh::mock::{test_profile, MockConnector, Script};
    use crate::ssh::{PoolSettings, PoolStats};
    use pretty_assertions::assert_eq;

    fn executor_with(
        connector: &MockConnector,
        profiles: impl IntoIterator<Item = ConnectionProfile>,
        max_connections: usize,
    ) -> CommandExecutor {
        let registry = ProfileRegistry::new(profiles);
        let settings = PoolSettings::builder()
            .max_connections_per_profile(max_connections)
            .sweep_interval(None)
            .build();
        let pool = ConnectionPool::new(&registry, Arc::new(connector.clone()), settings);
        CommandExecutor::new(Arc::new(pool))
    }

    fn executor(connector: &MockConnector) -> CommandExecutor {
        executor_with(connector, [test_profile("web")], 2)
    }

    fn small_output_profile(cap: usize) -> ConnectionProfile {
        let mut profile = test_profile("web");
        profile.max_output_bytes = cap;
        profile
    }

    #[test]
    fn test_capped_buffer_keeps_exactly_cap_bytes() {
        let mut buffer = CappedBuffer::new(5);
        buffer.push(b"abc");
        assert!(!buffer.truncated);
        buffer.push(b"defg");
        buffer.push(b"hij");
        assert_eq!(buffer.data, b"abcde");
        assert!(buffer.truncated);

        let mut exact = CappedBuffer::new(3);
        exact.push(b"abc");
        assert!(!exact.truncated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_round_trip() {
        let connector = MockConnector::default();
        connector.script("echo hello", Script::new().stdout("hello\n").exit(0));
        let executor = executor(&connector);

        let result = executor.execute("web", "echo hello", None).await.unwrap();

        assert_eq!(
            result,
            ExecutionResult {
                stdout: b"hello\n".to_vec(),
                stderr: Vec::new(),
                exit_code: Some(0),
                exit_signal: None,
                truncated: false,
                duration_ms: 0,
                timed_out: false,
            }
        );
        assert!(result.success());
        // Healthy connection goes back to the idle set
        let stats = executor.pool().stats("web").unwrap();
        assert_eq!((stats.idle, stats.checked_out), (1, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_with_request() {
        let connector = MockConnector::default();
        connector.script("ls /srv", Script::new().stdout("app\n").exit(0));
        let executor = executor(&connector);

        let request = ExecutionRequest::builder()
            .profile_id("web")
            .command("ls /srv")
            .timeout(Duration::from_secs(3))
            .build();
        let result = executor.run(request).await.unwrap();
        assert_eq!(result.stdout_lossy(), "app\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonzero_exit_is_data_and_keeps_connection() {
        let connector = MockConnector::default();
        connector.script(
            "cat /missing",
            Script::new()
                .stderr("cat: /missing: No such file or directory\n")
                .exit(1),
        );
        let executor = executor(&connector);

        let result = executor.execute("web", "cat /missing", None).await.unwrap();
        assert_eq!(result.exit_code, Some(1));
        assert!(!result.success());
        assert_eq!(
            result.stderr_lossy(),
            "cat: /missing: No such file or directory\n"
        );

        executor.execute("web", "ls", None).await.unwrap();
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_denied_command_never_touches_the_network() {
        let connector = MockConnector::default();
        let executor = executor(&connector);

        let err = executor.execute("web", "rm -rf /", None).await.err().unwrap();
        match err {
            ExecError::CommandNotAllowed {
                profile,
                command,
                reason,
            } => {
                assert_eq!(profile, "web");
                assert_eq!(command, "rm -rf /");
                assert_eq!(reason, DenyReason::NotInAllowlist("rm".into()));
            }
            other => panic!("unexpected error {other}"),
        }

        let err = executor.execute("web", "ls; reboot", None).await.err().unwrap();
        assert!(matches!(err, ExecError::CommandNotAllowed { .. }), "{err}");

        assert_eq!(connector.connects(), 0);
        assert_eq!(connector.channels_opened(), 0);
        assert_eq!(executor.pool().stats("web").unwrap().opened_total, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_profile() {
        let connector = MockConnector::default();
        let executor = executor(&connector);

        let err = executor.execute("nope", "ls", None).await.err().unwrap();
        assert!(matches!(err, ExecError::UnknownProfile { .. }), "{err}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_is_capped_per_stream() {
        let connector = MockConnector::default();
        connector.script(
            "yes",
            Script::new()
                .stdout("y\ny\ny\ny\ny\n")
                .stderr("warn")
                .stdout("y\ny\ny\ny\ny\n")
                .stdout("y\ny\ny\ny\ny\n")
                .exit(0),
        );
        let executor = executor_with(&connector, [small_output_profile(16)], 1);

        let result = executor.execute("web", "yes", None).await.unwrap();
        assert_eq!(result.stdout.len(), 16);
        assert_eq!(result.stderr, b"warn");
        assert!(result.truncated);
        // The channel was drained to completion
        assert_eq!(result.exit_code, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial_output_and_discards_connection() {
        let connector = MockConnector::default();
        connector.script(
            "sleep 60",
            Script::new()
                .stdout("starting\n")
                .after(Duration::from_secs(1))
                .stderr("still going\n")
                .hang(),
        );
        let executor = executor(&connector);

        let result = executor
            .execute("web", "sleep 60", Some(Duration::from_secs(2)))
            .await
            .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.stdout_lossy(), "starting\n");
        assert_eq!(result.stderr_lossy(), "still going\n");
        assert_eq!(result.duration_ms, 2000);
        assert_eq!(connector.channels_closed(), 1);

        let stats = executor.pool().stats("web").unwrap();
        assert_eq!((stats.idle, stats.checked_out), (0, 0));

        executor.execute("web", "ls", None).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_profile_command_timeout_applies_by_default() {
        let connector = MockConnector::default();
        connector.script("sleep 600", Script::new().hang());
        let executor = executor(&connector);

        let result = executor.execute("web", "sleep 600", None).await.unwrap();
        assert!(result.timed_out);
        assert_eq!(
            Duration::from_millis(result.duration_ms),
            test_profile("web").command_timeout
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_checked_turns_timeout_into_error() {
        let connector = MockConnector::default();
        connector.script("sleep 60", Script::new().stdout("tick\n").hang());
        let executor = executor(&connector);

        let err = executor
            .execute_checked("web", "sleep 60", Some(Duration::from_secs(1)))
            .await
            .err()
            .unwrap();

        match &err {
            ExecError::ExecutionTimeout {
                profile,
                command,
                timeout,
                partial,
            } => {
                assert_eq!(profile, "web");
                assert_eq!(command, "sleep 60");
                assert_eq!(*timeout, Duration::from_secs(1));
                assert_eq!(partial.stdout_lossy(), "tick\n");
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.is_transient());
        assert!(err.partial_result().is_some());

        connector.script("ls", Script::new().stdout("a\n").exit(0));
        let ok = executor.execute_checked("web", "ls", None).await.unwrap();
        assert_eq!(ok.stdout_lossy(), "a\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_channel_close_discards_connection() {
        let connector = MockConnector::default();
        connector.fail_channel_close(true);
        let executor = executor(&connector);

        let result = executor.execute("web", "ls", None).await.unwrap();
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(executor.pool().stats("web").unwrap().idle, 0);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_channel_open_is_a_connection_error() {
        let connector = MockConnector::default();
        connector.fail_channel_open(true);
        let executor = executor(&connector);

        let err = executor.execute("web", "ls", None).await.err().unwrap();
        assert!(matches!(err, ExecError::Connection { .. }), "{err}");
        assert_eq!(executor.pool().stats("web").unwrap().checked_out, 0);
        assert_eq!(connector.closes(), 1);

        connector.fail_channel_open(false);
        executor.execute("web", "ls", None).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unconfirmed_channel_open_counts_against_deadline() {
        let connector = MockConnector::default();
        connector.hang_channel_open(true);
        let executor = executor(&connector);

        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            executor.execute("web", "ls", Some(Duration::from_secs(1))),
        )
        .await
        .expect("deadline must bound the channel open")
        .unwrap();

        assert!(result.timed_out);
        assert_eq!(result.exit_code, None);
        assert_eq!(result.duration_ms, 1000);
        assert_eq!(
            executor.pool().stats("web").unwrap(),
            PoolStats {
                idle: 0,
                checked_out: 0,
                waiting: 0,
                opened_total: 1,
            }
        );
        assert_eq!(connector.closes(), 1);

        connector.hang_channel_open(false);
        executor.execute("web", "ls", None).await.unwrap();
        assert_eq!(connector.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_timeout_override_does_not_overflow() {
        let connector = MockConnector::default();
        connector.script("echo hi", Script::new().stdout("hi\n").exit(0));
        let executor = executor(&connector).with_acquire_timeout(Duration::MAX);

        let result = executor
            .execute("web", "echo hi", Some(Duration::MAX))
            .await
            .unwrap();
        assert!(result.success());
        assert_eq!(result.stdout_lossy(), "hi\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_reports_decision_without_connecting() {
        let connector = MockConnector::default();
        let executor = executor(&connector);

        let allowed = executor.check("web", "ls -la /srv").unwrap();
        assert!(allowed.allowed);
        assert_eq!(allowed.matched_rule.as_deref(), Some("ls"));

        let denied = executor.check("web", "ls | sh").unwrap();
        assert!(!denied.allowed);
        assert!(denied.reason.is_some());

        let err = executor.check("nope", "ls").err().unwrap();
        assert!(matches!(err, ExecError::UnknownProfile { .. }), "{err}");
        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exit_signal_is_recorded() {
        let connector = MockConnector::default();
        connector.script("cat /dev/zero", Script::new().stdout("\0\0").signal("KILL"));
        let executor = executor(&connector);

        let result = executor.execute("web", "cat /dev/zero", None).await.unwrap();
        assert_eq!(result.exit_code, None);
        assert_eq!(result.exit_signal.as_deref(), Some("KILL"));
        assert!(!result.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_saturated_pool_sheds_load() {
        let connector = MockConnector::default();
        connector.script("sleep 5", Script::new().after(Duration::from_secs(5)).exit(0));
        let executor = executor_with(&connector, [test_profile("web")], 1)
            .with_acquire_timeout(Duration::ZERO);

        let busy = executor.clone();
        let running = tokio::spawn(async move { busy.execute("web", "sleep 5", None).await });
        while executor.pool().stats("web").unwrap().checked_out == 0 {
            tokio::task::yield_now().await;
        }

        let err = executor.execute("web", "ls", None).await.err().unwrap();
        assert!(matches!(err, ExecError::PoolExhausted { .. }), "{err}");
        assert_eq!(err.profile(), "web");
        assert!(err.is_transient());

        assert_eq!(running.await.unwrap().unwrap().exit_code, Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_executions_share_bounded_connections() {
        let connector = MockConnector::default();
        connector.script(
            "echo hi",
            Script::new()
                .after(Duration::from_millis(50))
                .stdout("hi\n")
                .exit(0),
        );
        let executor = executor_with(&connector, [test_profile("web"), test_profile("db")], 2);

        let mut tasks = Vec::new();
        for i in 0..12 {
            let executor = executor.clone();
            let profile = if i % 2 == 0 { "web" } else { "db" };
            tasks.push(tokio::spawn(async move {
                executor.execute(profile, "echo hi", None).await
            }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap().stdout_lossy(), "hi\n");
        }

        assert!(connector.connects() <= 4);
        for profile in ["web", "db"] {
            assert_eq!(executor.pool().stats(profile).unwrap().checked_out, 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_credentials_never_surface() {
        let connector = MockConnector::default();
        connector.fail_connects_with(|profile| ExecError::Authentication {
            profile: profile.id.clone(),
            method: profile.auth.name(),
        });
        let executor = executor(&connector);

        let err = executor.execute("web", "ls", None).await.err().unwrap();
        assert!(!err.to_string().contains("hunter2"));
        assert!(!format!("{err:?}").contains("hunter2"));

        let listed = serde_json::to_string(&executor.list_profiles()).unwrap();
        assert!(!listed.contains("hunter2"));
        assert_eq!(
            executor.list_profiles(),
            vec![test_profile("web").summary()]
        );
    }

    #[test]
    fn test_result_serializes_output_as_text() {
        let result = ExecutionResult {
            stdout: b"hello\n".to_vec(),
            exit_code: Some(0),
            ..Default::default()
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["stdout"], "hello\n");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["timed_out"], false);
    }
}
