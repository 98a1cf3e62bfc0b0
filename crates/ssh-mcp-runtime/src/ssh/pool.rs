// A pool of ssh connections, sharded by profile.
//
// Each profile gets one shard with its own lock. Shards are created up front
// from the registry, so the shard map itself is never mutated and unrelated
// hosts never contend. A shard lock is held only while idle lists and
// counters are updated, never across a connect, an exec or a wait.
//
// Invariant per shard: checked_out + idle.len() <= max_connections_per_profile.
// Connections being established count as checked out.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use typed_builder::TypedBuilder;

use crate::error::{ExecError, Result};
use crate::profile::{ConnectionProfile, ProfileRegistry, ProfileSummary};
use crate::ssh::connection::Connection;
use crate::ssh::transport::{Connector, Transport};

// Stand-in for "no deadline" when a timeout is too large to add to an Instant
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + after`, saturating at a point far enough out to never fire
pub(crate) fn deadline_after(start: Instant, after: Duration) -> Instant {
    start
        .checked_add(after)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

#[derive(Debug, Clone, TypedBuilder)]
pub struct PoolSettings {
    #[builder(default = 4)]
    pub max_connections_per_profile: usize,
    /// Idle connections kept per profile, capped at `max_connections_per_profile`
    #[builder(default = 2)]
    pub max_idle_per_profile: usize,
    /// Callers allowed to wait for a saturated profile before new ones are shed
    #[builder(default = 64)]
    pub max_waiters_per_profile: usize,
    /// How often idle connections are swept. `None` disables the background sweep.
    #[builder(default = Some(Duration::from_secs(30)))]
    pub sweep_interval: Option<Duration>,
}

impl Default for PoolSettings {
    fn default() -> Self {
        PoolSettings::builder().build()
    }
}

/// Point-in-time counters for one profile
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub checked_out: usize,
    pub waiting: usize,
    /// Connections successfully established over the pool's lifetime
    pub opened_total: u64,
}

#[derive(Default)]
struct ShardState {
    idle: VecDeque<Connection>,
    checked_out: usize,
    waiting: usize,
    opened_total: u64,
}

struct Shard {
    profile: Arc<ConnectionProfile>,
    state: Mutex<ShardState>,
    released: Notify,
}

impl Shard {
    fn lock(&self) -> MutexGuard<'_, ShardState> {
        // Bookkeeping never panics while holding the lock, but a poisoned
        // lock must not take the whole pool down with it.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Split idle connections into those still usable and those to close
    fn take_stale(&self, state: &mut ShardState, now: Instant) -> Vec<Connection> {
        let idle_timeout = self.profile.idle_timeout;
        let (fresh, stale): (VecDeque<_>, VecDeque<_>) = state
            .idle
            .drain(..)
            .partition(|conn| conn.is_reusable(now, idle_timeout));
        state.idle = fresh;
        stale.into()
    }
}

struct PoolInner {
    shards: HashMap<String, Shard>,
    connector: Arc<dyn Connector>,
    settings: PoolSettings,
    closed: AtomicBool,
}

impl PoolInner {
    fn shard(&self, profile_id: &str) -> Result<&Shard> {
        self.shards
            .get(profile_id)
            .ok_or_else(|| ExecError::UnknownProfile {
                profile: profile_id.to_string(),
            })
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Return a connection to its shard. Hands back the connection if it has
    /// to be closed instead of pooled; the caller closes it outside the lock.
    fn check_in(&self, mut conn: Connection, healthy: bool) -> Option<Connection> {
        let Some(shard) = self.shards.get(&conn.profile_id) else {
            return Some(conn);
        };

        let to_close = {
            let mut state = shard.lock();
            state.checked_out = state.checked_out.saturating_sub(1);

            let max_idle = self
                .settings
                .max_idle_per_profile
                .min(self.settings.max_connections_per_profile);
            let keep = healthy
                && conn.healthy
                && !self.is_closed()
                && !conn.transport().is_closed()
                && state.idle.len() < max_idle;

            if keep {
                conn.touch();
                state.idle.push_back(conn);
                None
            } else {
                conn.healthy = false;
                Some(conn)
            }
        };

        match &to_close {
            Some(conn) => tracing::debug!("Discarding connection {} for {}", conn.id, conn.profile_id),
            None => tracing::trace!("Connection returned to idle pool"),
        }

        shard.released.notify_one();
        to_close
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut swept = 0;

        for (profile_id, shard) in &self.shards {
            let stale = {
                let mut state = shard.lock();
                shard.take_stale(&mut state, now)
            };
            if stale.is_empty() {
                continue;
            }

            tracing::debug!("Evicting {} idle connections for {profile_id}", stale.len());
            swept += stale.len();
            for conn in stale {
                conn.close().await;
                shard.released.notify_one();
            }
        }

        swept
    }
}

/// Keeps a slot counted as checked out while a connection is being opened.
/// Dropping it unarmed gives the slot back.
struct Reservation<'a> {
    shard: &'a Shard,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.shard.lock().checked_out -= 1;
            self.shard.released.notify_one();
        }
    }
}

/// Counts a caller waiting on a saturated shard for as long as it waits
struct Waiter<'a> {
    shard: &'a Shard,
    registered: bool,
}

impl Waiter<'_> {
    /// Stop counting as waiting once a slot has been claimed
    fn leave(&mut self, state: &mut ShardState) {
        if self.registered {
            state.waiting -= 1;
            self.registered = false;
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        if self.registered {
            self.shard.lock().waiting -= 1;
        }
    }
}

enum Step {
    Reuse(Connection),
    Open,
    Wait,
    Exhausted,
}

/// A connection checked out of the pool. Give it back with
/// [`ConnectionPool::release`]; dropping it instead counts as an unhealthy
/// release and closes the connection in the background.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    fn connection(&self) -> &Connection {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("connection is only taken on release or drop"),
        }
    }

    pub fn id(&self) -> uuid::Uuid {
        self.connection().id
    }

    pub fn profile_id(&self) -> &str {
        &self.connection().profile_id
    }

    pub fn transport(&self) -> &dyn Transport {
        self.connection().transport()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };

        tracing::debug!("Connection {} dropped without release", conn.id);
        if let Some(conn) = self.pool.check_in(conn, false) {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(conn.close());
                }
                Err(_) => drop(conn),
            }
        }
    }
}

/// Process-wide registry of live connections, one shard per profile.
/// Create one and inject it wherever connections are needed.
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    pub fn new(
        registry: &ProfileRegistry,
        connector: Arc<dyn Connector>,
        settings: PoolSettings,
    ) -> Self {
        let shards = registry
            .ids()
            .filter_map(|id| registry.get(id))
            .map(|profile| {
                (
                    profile.id.clone(),
                    Shard {
                        profile,
                        state: Mutex::new(ShardState::default()),
                        released: Notify::new(),
                    },
                )
            })
            .collect();

        let inner = Arc::new(PoolInner {
            shards,
            connector,
            settings,
            closed: AtomicBool::new(false),
        });

        let sweeper = inner
            .settings
            .sweep_interval
            .and_then(|every| Self::start_sweeper(&inner, every));

        ConnectionPool {
            inner,
            sweeper: Mutex::new(sweeper),
        }
    }

    /// Start the background idle sweep. It only holds a weak reference, so
    /// it stops on its own once the pool is gone.
    fn start_sweeper(inner: &Arc<PoolInner>, every: Duration) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("No tokio runtime, idle connections are only evicted on acquire");
            return None;
        };
        let pool = Arc::downgrade(inner);

        Some(runtime.spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;

                let Some(inner) = Weak::upgrade(&pool) else {
                    break;
                };
                if inner.is_closed() {
                    break;
                }

                let swept = inner.sweep().await;
                if swept > 0 {
                    tracing::debug!("Idle sweep closed {swept} connections");
                }
            }
            tracing::debug!("Connection pool gone, stopping idle sweep");
        }))
    }

    pub fn profile(&self, profile_id: &str) -> Option<Arc<ConnectionProfile>> {
        self.inner
            .shards
            .get(profile_id)
            .map(|shard| shard.profile.clone())
    }

    pub fn list_profiles(&self) -> Vec<ProfileSummary> {
        let mut profiles: Vec<_> = self
            .inner
            .shards
            .values()
            .map(|shard| shard.profile.summary())
            .collect();
        profiles.sort_by(|a, b| a.id.cmp(&b.id));
        profiles
    }

    pub fn stats(&self, profile_id: &str) -> Option<PoolStats> {
        let shard = self.inner.shards.get(profile_id)?;
        let state = shard.lock();
        Some(PoolStats {
            idle: state.idle.len(),
            checked_out: state.checked_out,
            waiting: state.waiting,
            opened_total: state.opened_total,
        })
    }

    /// Check out a connection for `profile_id`, reusing an idle one when
    /// possible and establishing a new one when there is room. A saturated
    /// profile makes the caller wait up to `acquire_timeout` for a release.
    pub async fn acquire(
        &self,
        profile_id: &str,
        acquire_timeout: Duration,
    ) -> Result<PooledConnection> {
        let shard = self.inner.shard(profile_id)?;
        let deadline = deadline_after(Instant::now(), acquire_timeout);
        let mut waiter = Waiter {
            shard,
            registered: false,
        };

        loop {
            // Register for wakeups before looking at the state, so a release
            // landing in between is not missed
            let notified = shard.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.inner.is_closed() {
                return Err(ExecError::PoolClosed {
                    profile: profile_id.to_string(),
                });
            }

            let (step, stale) = {
                let mut state = shard.lock();
                let stale = shard.take_stale(&mut state, Instant::now());

                let step = if let Some(conn) = state.idle.pop_back() {
                    state.checked_out += 1;
                    waiter.leave(&mut state);
                    Step::Reuse(conn)
                } else if state.checked_out + state.idle.len()
                    < self.inner.settings.max_connections_per_profile
                {
                    state.checked_out += 1;
                    waiter.leave(&mut state);
                    Step::Open
                } else if acquire_timeout.is_zero()
                    || (!waiter.registered
                        && state.waiting >= self.inner.settings.max_waiters_per_profile)
                {
                    Step::Exhausted
                } else {
                    if !waiter.registered {
                        state.waiting += 1;
                        waiter.registered = true;
                    }
                    Step::Wait
                };

                (step, stale)
            };

            for conn in stale {
                tracing::debug!("Closing stale idle connection {} for {profile_id}", conn.id);
                conn.close().await;
            }

            match step {
                Step::Reuse(conn) => {
                    tracing::debug!("Reusing connection {} for {profile_id}", conn.id);
                    return Ok(self.checked_out(conn));
                }
                Step::Open => return self.open(shard).await,
                Step::Exhausted => {
                    tracing::warn!("Connection pool for {profile_id} is exhausted");
                    return Err(ExecError::PoolExhausted {
                        profile: profile_id.to_string(),
                    });
                }
                Step::Wait => {
                    tracing::trace!("Waiting for a free connection slot for {profile_id}");
                    if timeout_at(deadline, notified.as_mut()).await.is_err() {
                        return Err(ExecError::AcquireTimeout {
                            profile: profile_id.to_string(),
                            waited: acquire_timeout,
                        });
                    }
                }
            }
        }
    }

    async fn open(&self, shard: &Shard) -> Result<PooledConnection> {
        let mut reservation = Reservation { shard, armed: true };
        let profile = &shard.profile;

        tracing::debug!("Creating new SSH connection for {}", profile.id);
        let transport = self
            .inner
            .connector
            .connect(profile)
            .await
            .inspect_err(|e| tracing::error!("Failed to connect to {}: {e}", profile.id))?;

        if self.inner.is_closed() {
            let _ = transport.close().await;
            return Err(ExecError::PoolClosed {
                profile: profile.id.clone(),
            });
        }

        shard.lock().opened_total += 1;
        reservation.armed = false;

        let conn = Connection::new(&profile.id, transport);
        tracing::debug!("Opened connection {} for {}", conn.id, profile.id);
        Ok(self.checked_out(conn))
    }

    fn checked_out(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: self.inner.clone(),
        }
    }

    /// Give a connection back. Healthy connections return to the idle set
    /// while there is room; anything else is closed.
    pub async fn release(&self, mut conn: PooledConnection, healthy: bool) {
        let Some(connection) = conn.conn.take() else {
            return;
        };

        if let Some(to_close) = self.inner.check_in(connection, healthy) {
            to_close.close().await;
        }
    }

    /// Close idle connections older than their profile's idle timeout
    pub async fn sweep_idle(&self) -> usize {
        self.inner.sweep().await
    }

    /// Close every idle connection and refuse further acquires. Connections
    /// still checked out are closed when they are released.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }

        for (profile_id, shard) in &self.inner.shards {
            let idle: Vec<_> = shard.lock().idle.drain(..).collect();
            shard.released.notify_waiters();

            if !idle.is_empty() {
                tracing::debug!("Closing {} idle connections for {profile_id}", idle.len());
            }
            for conn in idle {
                conn.close().await;
            }
        }

        tracing::info!("Connection pool shut down");
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        if let Some(sweeper) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            sweeper.abort();
        }
    }
}
