use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use super::session::WorkerSession;

/// Flags live sessions that have been silent for longer than `timeout`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct HeartbeatMonitor {
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub(crate) const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub(crate) const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Sweep period: half the timeout, but never below 200ms unless the
    /// timeout itself is shorter.
    pub(crate) fn check_interval(&self) -> Duration {
        let timeout_ms = self.timeout.as_millis();
        let mut interval_ms = timeout_ms.saturating_div(2);
        if interval_ms < 200 {
            interval_ms = timeout_ms.max(1);
        }
        Duration::from_millis(u64::try_from(interval_ms).unwrap_or(1))
    }

    pub(crate) fn is_expired(&self, last_seen: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last_seen) > self.timeout
    }

    pub(crate) fn expired(
        &self,
        sessions: &HashMap<Arc<str>, WorkerSession>,
        now: Instant,
    ) -> Vec<Arc<str>> {
        let mut expired: Vec<Arc<str>> = sessions
            .values()
            .filter(|session| session.is_live())
            .filter(|session| self.is_expired(session.last_heartbeat_at, now))
            .map(|session| Arc::clone(&session.id))
            .collect();
        expired.sort();
        expired
    }
}
