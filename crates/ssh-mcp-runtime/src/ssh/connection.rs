use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::ssh::transport::Transport;

/// One authenticated session to a single host, owned by the pool
pub struct Connection {
    pub id: Uuid,
    pub profile_id: String,
    pub last_used_at: Instant,
    pub healthy: bool,
    transport: Box<dyn Transport>,
}

impl Connection {
    pub fn new(profile_id: &str, transport: Box<dyn Transport>) -> Self {
        Connection {
            id: Uuid::new_v4(),
            profile_id: profile_id.to_string(),
            last_used_at: Instant::now(),
            healthy: true,
            transport,
        }
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Time since the connection was last checked in
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used_at)
    }

    /// Whether the connection can be handed out again
    pub fn is_reusable(&self, now: Instant, idle_timeout: Duration) -> bool {
        self.healthy && !self.transport.is_closed() && self.idle_for(now) < idle_timeout
    }

    pub fn touch(&mut self) {
        self.last_used_at = Instant::now();
    }

    pub async fn close(self) {
        tracing::debug!("Closing connection {} for {}", self.id, self.profile_id);
        if let Err(e) = self.transport.close().await {
            tracing::debug!("Error closing connection {}: {e}", self.id);
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("profile_id", &self.profile_id)
            .field("last_used_at", &self.last_used_at)
            .field("healthy", &self.healthy)
            .finish_non_exhaustive()
    }
}
