use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::protocol::{IterationRange, RegisterMessage, WireMessage};

use super::events::{ConnectionId, Outbound};

/// Lifecycle of a worker as reported in snapshots.
///
/// A socket that has not sent `register` yet has no id, so the coordinator
/// keeps it as a pending connection outside the snapshot. `Connecting` stays
/// in the vocabulary for status consumers and is never reported by this
/// coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Connecting,
    Idle,
    Working,
    Disconnected,
}

/// Outbound half of a connection that has not registered yet.
#[derive(Debug)]
pub(crate) struct PendingConnection {
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) opened_at: Instant,
    pub(crate) outbound: mpsc::UnboundedSender<Outbound>,
}

impl PendingConnection {
    pub(crate) fn send(&self, message: WireMessage) {
        if self.outbound.send(Outbound::Message(message)).is_err() {
            // Writer already gone; the close event follows.
        }
    }

    pub(crate) fn close(&self) {
        if self.outbound.send(Outbound::Close).is_err() {
            // Writer already gone.
        }
    }
}

/// One registered worker as seen by the control loop.
#[derive(Debug)]
pub(crate) struct WorkerSession {
    pub(crate) id: Arc<str>,
    pub(crate) state: WorkerState,
    pub(crate) platform: String,
    pub(crate) runtime_version: String,
    pub(crate) connected_at: DateTime<Utc>,
    pub(crate) assigned_range: Option<IterationRange>,
    pub(crate) last_heartbeat_at: Instant,
    pub(crate) disconnected_at: Option<Instant>,
    pub(crate) progress: u64,
    pub(crate) connection: ConnectionId,
    pub(crate) registration_seq: u64,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
}

impl WorkerSession {
    /// Builds an idle session from a validated registration.
    pub(crate) fn admit(
        register: RegisterMessage,
        connection: ConnectionId,
        outbound: mpsc::UnboundedSender<Outbound>,
        registration_seq: u64,
        now: Instant,
    ) -> Self {
        Self {
            id: Arc::from(register.id),
            state: WorkerState::Idle,
            platform: register.platform,
            runtime_version: register.runtime_version,
            connected_at: Utc::now(),
            assigned_range: None,
            last_heartbeat_at: now,
            disconnected_at: None,
            progress: 0,
            connection,
            registration_seq,
            outbound: Some(outbound),
        }
    }

    pub(crate) const fn is_live(&self) -> bool {
        !matches!(self.state, WorkerState::Disconnected)
    }

    pub(crate) const fn is_idle(&self) -> bool {
        matches!(self.state, WorkerState::Idle)
    }

    pub(crate) const fn touch(&mut self, now: Instant) {
        self.last_heartbeat_at = now;
    }

    pub(crate) const fn begin_work(&mut self, range: IterationRange) {
        self.state = WorkerState::Working;
        self.assigned_range = Some(range);
        self.progress = 0;
    }

    pub(crate) const fn finish_work(&mut self) {
        if matches!(self.state, WorkerState::Working) {
            self.state = WorkerState::Idle;
        }
        self.assigned_range = None;
    }

    /// Marks the session disconnected and hands back any assigned range.
    pub(crate) fn disconnect(&mut self, now: Instant) -> Option<IterationRange> {
        self.state = WorkerState::Disconnected;
        self.disconnected_at = Some(now);
        self.close();
        self.outbound = None;
        self.assigned_range.take()
    }

    pub(crate) fn send(&self, message: WireMessage) {
        if let Some(outbound) = self.outbound.as_ref()
            && outbound.send(Outbound::Message(message)).is_err()
        {
            // Writer already gone; the close event follows.
        }
    }

    pub(crate) fn close(&self) {
        if let Some(outbound) = self.outbound.as_ref()
            && outbound.send(Outbound::Close).is_err()
        {
            // Writer already gone.
        }
    }
}
