use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};

use crate::protocol::IterationRange;

use super::run::RunStatus;
use super::session::WorkerState;

/// Immutable view of the coordinator published after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub sequence: u64,
    pub listening: bool,
    pub port: Option<u16>,
    pub expected_workers: Option<usize>,
    pub run_id: Option<String>,
    pub status: Option<RunStatus>,
    pub total: u64,
    pub completed: u64,
    pub failed: u64,
    pub unassigned: u64,
    pub assigned: u64,
    pub workers: Vec<WorkerSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSnapshot {
    pub id: String,
    pub state: WorkerState,
    pub platform: String,
    pub runtime_version: String,
    pub connected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_range: Option<IterationRange>,
    pub progress: u64,
}

impl StatusSnapshot {
    #[must_use]
    pub fn live_workers(&self) -> usize {
        self.workers
            .iter()
            .filter(|worker| worker.state != WorkerState::Disconnected)
            .count()
    }
}

impl fmt::Display for StatusSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            Some(RunStatus::Pending) => "pending",
            Some(RunStatus::Running) => "running",
            Some(RunStatus::Completed) => "completed",
            Some(RunStatus::Aborted) => "aborted",
            None => "idle",
        };
        write!(
            f,
            "#{} {} run={} done={}/{} failed={} unassigned={} assigned={} workers={}/{}",
            self.sequence,
            status,
            self.run_id.as_deref().unwrap_or("-"),
            self.completed.saturating_add(self.failed),
            self.total,
            self.failed,
            self.unassigned,
            self.assigned,
            self.live_workers(),
            self.workers.len()
        )
    }
}

/// Fan-out of snapshots: a bounded broadcast for subscribers plus a watch
/// cell holding the latest value. Publishing never blocks.
#[derive(Debug)]
pub(crate) struct SnapshotPublisher {
    updates: broadcast::Sender<Arc<StatusSnapshot>>,
    latest: watch::Sender<Arc<StatusSnapshot>>,
}

impl SnapshotPublisher {
    pub(crate) fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity.max(1));
        let (latest, _) = watch::channel(Arc::new(StatusSnapshot::default()));
        Self { updates, latest }
    }

    /// Stamps `snapshot` with the next sequence number and publishes it.
    pub(crate) fn publish(&self, mut snapshot: StatusSnapshot) -> Arc<StatusSnapshot> {
        snapshot.sequence = self.latest.borrow().sequence.saturating_add(1);
        let snapshot = Arc::new(snapshot);
        self.latest.send_replace(Arc::clone(&snapshot));
        if self.updates.send(Arc::clone(&snapshot)).is_err() {
            // No subscribers right now.
        }
        snapshot
    }

    pub(crate) fn latest(&self) -> Arc<StatusSnapshot> {
        Arc::clone(&self.latest.borrow())
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Arc<StatusSnapshot>> {
        self.updates.subscribe()
    }

    pub(crate) fn watch(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.latest.subscribe()
    }
}
