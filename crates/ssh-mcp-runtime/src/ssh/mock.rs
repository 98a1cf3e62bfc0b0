// Scripted stand-in for the russh connector, used by the pool and executor tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ExecError, Result};
use crate::profile::{AuthMethod, ConnectionProfile, HostKeyCheck, Secret};
use crate::ssh::transport::{ChannelEvent, Connector, ExecChannel, Transport};

pub(crate) fn test_profile(id: &str) -> ConnectionProfile {
    ConnectionProfile::builder()
        .id(id)
        .hostname(format!("{id}.internal"))
        .username("deploy")
        .auth(AuthMethod::Password {
            password: Secret::new("hunter2"),
        })
        .host_key(HostKeyCheck::InsecureAcceptAny)
        .allowed_commands(&["echo", "ls", "cat", "sleep", "yes", "false"])
        .build()
}

/// What the remote side does for one command
#[derive(Debug, Clone, Default)]
pub(crate) struct Script {
    steps: Vec<(Duration, ChannelEvent)>,
    next_delay: Duration,
    hang: bool,
}

impl Script {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, event: ChannelEvent) -> Self {
        let delay = std::mem::take(&mut self.next_delay);
        self.steps.push((delay, event));
        self
    }

    /// Delay the next event
    pub fn after(mut self, delay: Duration) -> Self {
        self.next_delay = delay;
        self
    }

    pub fn stdout(self, data: impl Into<Bytes>) -> Self {
        self.push(ChannelEvent::Stdout(data.into()))
    }

    pub fn stderr(self, data: impl Into<Bytes>) -> Self {
        self.push(ChannelEvent::Stderr(data.into()))
    }

    pub fn exit(self, code: u32) -> Self {
        self.push(ChannelEvent::ExitStatus(code)).push(ChannelEvent::Eof)
    }

    pub fn signal(self, name: &str) -> Self {
        self.push(ChannelEvent::ExitSignal(name.to_string()))
            .push(ChannelEvent::Eof)
    }

    /// Never finish after the scripted events
    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }
}

#[derive(Default)]
struct Shared {
    connects: AtomicUsize,
    closes: AtomicUsize,
    channels_opened: AtomicUsize,
    channels_closed: AtomicUsize,
    connect_delay: Mutex<Duration>,
    connect_failure: Mutex<Option<fn(&ConnectionProfile) -> ExecError>>,
    fail_channel_open: AtomicBool,
    hang_channel_open: AtomicBool,
    fail_channel_close: AtomicBool,
    scripts: Mutex<HashMap<String, Script>>,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
}

#[derive(Clone, Default)]
pub(crate) struct MockConnector {
    shared: Arc<Shared>,
}

impl MockConnector {
    pub fn script(&self, command: &str, script: Script) {
        self.shared
            .scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), script);
    }

    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.shared.closes.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.shared.channels_opened.load(Ordering::SeqCst)
    }

    pub fn channels_closed(&self) -> usize {
        self.shared.channels_closed.load(Ordering::SeqCst)
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.shared.connect_delay.lock().unwrap() = delay;
    }

    pub fn fail_connects_with(&self, failure: fn(&ConnectionProfile) -> ExecError) {
        *self.shared.connect_failure.lock().unwrap() = Some(failure);
    }

    pub fn succeed_connects(&self) {
        *self.shared.connect_failure.lock().unwrap() = None;
    }

    pub fn fail_channel_open(&self, fail: bool) {
        self.shared.fail_channel_open.store(fail, Ordering::SeqCst);
    }

    /// Server never confirms new channels
    pub fn hang_channel_open(&self, hang: bool) {
        self.shared.hang_channel_open.store(hang, Ordering::SeqCst);
    }

    pub fn fail_channel_close(&self, fail: bool) {
        self.shared.fail_channel_close.store(fail, Ordering::SeqCst);
    }

    /// Simulate every server hanging up
    pub fn drop_all_sessions(&self) {
        for closed in self.shared.sessions.lock().unwrap().iter() {
            closed.store(true, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn Transport>> {
        let delay = *self.shared.connect_delay.lock().unwrap();
        if tokio::time::timeout(profile.connect_timeout, tokio::time::sleep(delay))
            .await
            .is_err()
        {
            return Err(ExecError::ConnectTimeout {
                profile: profile.id.clone(),
                timeout: profile.connect_timeout,
            });
        }

        let failure = *self.shared.connect_failure.lock().unwrap();
        if let Some(failure) = failure {
            return Err(failure(profile));
        }

        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let closed = Arc::new(AtomicBool::new(false));
        self.shared.sessions.lock().unwrap().push(closed.clone());

        Ok(Box::new(MockTransport {
            shared: self.shared.clone(),
            profile_id: profile.id.clone(),
            closed,
        }))
    }
}

struct MockTransport {
    shared: Arc<Shared>,
    profile_id: String,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_exec_channel(&self, command: &str) -> Result<Box<dyn ExecChannel>> {
        if self.shared.hang_channel_open.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.is_closed() || self.shared.fail_channel_open.load(Ordering::SeqCst) {
            return Err(ExecError::connection(
                &self.profile_id,
                "failed to open session channel",
            ));
        }

        self.shared.channels_opened.fetch_add(1, Ordering::SeqCst);
        let script = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| Script::new().exit(0));

        Ok(Box::new(MockChannel {
            shared: self.shared.clone(),
            profile_id: self.profile_id.clone(),
            steps: script.steps.into(),
            hang: script.hang,
        }))
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shared.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MockChannel {
    shared: Arc<Shared>,
    profile_id: String,
    steps: VecDeque<(Duration, ChannelEvent)>,
    hang: bool,
}

#[async_trait]
impl ExecChannel for MockChannel {
    async fn next_event(&mut self) -> Option<ChannelEvent> {
        match self.steps.pop_front() {
            Some((delay, event)) => {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                Some(event)
            }
            None if self.hang => std::future::pending().await,
            None => None,
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.shared.channels_closed.fetch_add(1, Ordering::SeqCst);
        if self.shared.fail_channel_close.load(Ordering::SeqCst) {
            return Err(ExecError::connection(&self.profile_id, "channel close failed"));
        }
        Ok(())
    }
}
