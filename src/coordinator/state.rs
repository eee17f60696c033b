use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::CoordinatorError;
use crate::protocol::{
    AbortMessage, AssignMessage, ErrorMessage, ProgressMessage, RegisterMessage, ResultMessage,
    ShutdownMessage, WireMessage,
};

use super::events::{ConnectionEvent, ConnectionId, Outbound};
use super::heartbeat::HeartbeatMonitor;
use super::ledger::LedgerCounts;
use super::partition::partition;
use super::run::Run;
use super::session::{PendingConnection, WorkerSession, WorkerState};
use super::settings::CoordinatorSettings;
use super::snapshot::{SnapshotPublisher, StatusSnapshot, WorkerSnapshot};
use super::utils::{build_run_id, duration_to_ms};

/// Everything the control loop owns. Handlers are synchronous and take the
/// current instant so timing can be driven from tests.
pub(crate) struct CoordinatorState {
    settings: CoordinatorSettings,
    heartbeat: HeartbeatMonitor,
    port: Option<u16>,
    listening: bool,
    pending: HashMap<ConnectionId, PendingConnection>,
    sessions: HashMap<Arc<str>, WorkerSession>,
    connections: HashMap<ConnectionId, Arc<str>>,
    registration_seq: u64,
    run: Option<Run>,
    run_counter: u64,
    publisher: Arc<SnapshotPublisher>,
}

impl CoordinatorState {
    pub(crate) fn new(
        settings: CoordinatorSettings,
        publisher: Arc<SnapshotPublisher>,
        port: Option<u16>,
    ) -> Self {
        let heartbeat = HeartbeatMonitor::new(settings.heartbeat_timeout());
        Self {
            settings,
            heartbeat,
            port,
            listening: port.is_some(),
            pending: HashMap::new(),
            sessions: HashMap::new(),
            connections: HashMap::new(),
            registration_seq: 0,
            run: None,
            run_counter: 0,
            publisher,
        }
    }

    pub(crate) fn tick_interval(&self) -> Duration {
        self.heartbeat.check_interval()
    }

    pub(crate) const fn run(&self) -> Option<&Run> {
        self.run.as_ref()
    }

    pub(crate) fn on_event(&mut self, event: ConnectionEvent, now: Instant) {
        match event {
            ConnectionEvent::Opened {
                connection,
                peer,
                outbound,
            } => self.on_connection_opened(connection, peer, outbound, now),
            ConnectionEvent::Inbound {
                connection,
                message,
            } => self.on_inbound(connection, message, now),
            ConnectionEvent::Malformed { connection, reason } => {
                self.on_malformed(connection, &reason, now);
            }
            ConnectionEvent::Closed { connection, reason } => {
                self.on_connection_closed(connection, &reason, now);
            }
        }
    }

    fn on_connection_opened(
        &mut self,
        connection: ConnectionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<Outbound>,
        now: Instant,
    ) {
        let pending = PendingConnection {
            peer,
            opened_at: now,
            outbound,
        };
        if !self.listening {
            pending.send(WireMessage::Shutdown(ShutdownMessage {
                reason: "Coordinator is stopping.".to_owned(),
            }));
            pending.close();
            return;
        }
        debug!(
            "Connection {} opened from {}",
            connection,
            describe_peer(peer)
        );
        self.pending.insert(connection, pending);
    }

    fn on_inbound(&mut self, connection: ConnectionId, message: WireMessage, now: Instant) {
        if self.pending.contains_key(&connection) {
            match message {
                WireMessage::Register(register) => self.register(connection, register, now),
                other @ (WireMessage::Assign(_)
                | WireMessage::Progress(_)
                | WireMessage::Result(_)
                | WireMessage::Abort(_)
                | WireMessage::Heartbeat(_)
                | WireMessage::Shutdown(_)
                | WireMessage::Error(_)) => {
                    let err = CoordinatorError::MalformedMessage {
                        reason: format!("Expected register first, got {}.", other.kind()),
                    };
                    self.reject_pending(connection, &err);
                }
            }
            return;
        }

        let Some(id) = self.connections.get(&connection).cloned() else {
            debug!(
                "Ignoring {} from retired connection {}",
                message.kind(),
                connection
            );
            return;
        };
        if let Some(session) = self.sessions.get_mut(&id) {
            session.touch(now);
        }

        match message {
            WireMessage::Heartbeat(_) => {}
            WireMessage::Progress(progress) => self.handle_progress(&id, &progress),
            WireMessage::Result(result) => self.handle_result(&id, &result),
            other @ (WireMessage::Register(_)
            | WireMessage::Assign(_)
            | WireMessage::Abort(_)
            | WireMessage::Shutdown(_)
            | WireMessage::Error(_)) => {
                let err = CoordinatorError::MalformedMessage {
                    reason: format!("Unexpected {} from worker.", other.kind()),
                };
                self.drop_misbehaving(&id, &err, now);
            }
        }
    }

    fn on_malformed(&mut self, connection: ConnectionId, reason: &str, now: Instant) {
        let err = CoordinatorError::MalformedMessage {
            reason: reason.to_owned(),
        };
        if self.pending.contains_key(&connection) {
            self.reject_pending(connection, &err);
            return;
        }
        if let Some(id) = self.connections.get(&connection).cloned() {
            self.drop_misbehaving(&id, &err, now);
        }
    }

    fn on_connection_closed(&mut self, connection: ConnectionId, reason: &str, now: Instant) {
        if self.pending.remove(&connection).is_some() {
            debug!(
                "Unregistered connection {} closed: {}",
                connection, reason
            );
            return;
        }
        if let Some(id) = self.connections.get(&connection).cloned() {
            self.disconnect_session(&id, reason, now);
        }
    }

    fn register(&mut self, connection: ConnectionId, register: RegisterMessage, now: Instant) {
        let id = register.id.trim().to_owned();
        if id.is_empty() {
            let err = CoordinatorError::MalformedMessage {
                reason: "Worker id must not be empty.".to_owned(),
            };
            self.reject_pending(connection, &err);
            return;
        }
        if let Some(existing) = self.sessions.get(id.as_str()) {
            if existing.is_live() {
                let err = CoordinatorError::DuplicateWorkerId { worker_id: id };
                self.reject_pending(connection, &err);
                return;
            }
            debug!("Replacing disconnected session {}", id);
            self.sessions.remove(id.as_str());
        }
        let Some(pending) = self.pending.remove(&connection) else {
            return;
        };

        self.registration_seq = self.registration_seq.saturating_add(1);
        let session = WorkerSession::admit(
            RegisterMessage { id, ..register },
            connection,
            pending.outbound,
            self.registration_seq,
            now,
        );
        info!(
            "Worker {} registered from {} (platform={}, runtime={})",
            session.id,
            describe_peer(pending.peer),
            session.platform,
            session.runtime_version
        );
        let worker_id = Arc::clone(&session.id);
        self.connections.insert(connection, Arc::clone(&worker_id));
        self.sessions.insert(Arc::clone(&worker_id), session);

        self.rebalance();
        self.notify_if_idle(&worker_id);
        self.publish();
    }

    fn reject_pending(&mut self, connection: ConnectionId, err: &CoordinatorError) {
        let Some(pending) = self.pending.remove(&connection) else {
            return;
        };
        warn!(
            "Rejecting connection {} from {}: {}",
            connection,
            describe_peer(pending.peer),
            err
        );
        pending.send(WireMessage::Error(ErrorMessage {
            message: err.to_string(),
        }));
        pending.close();
    }

    fn drop_misbehaving(&mut self, id: &Arc<str>, err: &CoordinatorError, now: Instant) {
        warn!("Dropping worker {}: {}", id, err);
        if let Some(session) = self.sessions.get(id) {
            session.send(WireMessage::Error(ErrorMessage {
                message: err.to_string(),
            }));
        }
        self.disconnect_session(id, &err.to_string(), now);
    }

    fn disconnect_session(&mut self, id: &Arc<str>, reason: &str, now: Instant) {
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if !session.is_live() {
            return;
        }
        let connection = session.connection;
        let released = session.disconnect(now);
        self.connections.remove(&connection);
        info!("Worker {} disconnected: {}", id, reason);

        if let Some(range) = released
            && let Some(run) = self.run.as_mut()
        {
            let returned = run.release(range, id);
            if returned > 0 {
                info!(
                    "Returned {} indices of {} from worker {} to the pool",
                    returned, range, id
                );
            }
        }
        self.rebalance();
        self.publish();
    }

    fn handle_progress(&mut self, id: &Arc<str>, progress: &ProgressMessage) {
        let Some(run) = self.run.as_ref() else {
            return;
        };
        if progress.run_id != run.id() {
            debug!(
                "Ignoring progress for run {} from worker {}",
                progress.run_id, id
            );
            return;
        }
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        if session.state != WorkerState::Working {
            return;
        }
        session.progress = progress.completed_so_far;
        self.publish();
    }

    fn handle_result(&mut self, id: &Arc<str>, result: &ResultMessage) {
        let Some(run) = self.run.as_mut() else {
            warn!("Ignoring result from worker {}: no active run", id);
            return;
        };
        let Some(session) = self.sessions.get_mut(id) else {
            return;
        };
        let assigned = if session.state == WorkerState::Working {
            session.assigned_range
        } else {
            None
        };
        let outcome = match run.apply_result(id, assigned, result) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!("Ignoring result from worker {}: {}", id, err);
                return;
            }
        };
        debug!(
            "Worker {} reported {} (completed={}, failed={}, replayed={})",
            id,
            result.range,
            outcome.batch.completed,
            outcome.batch.failed,
            outcome.batch.skipped
        );
        if outcome.returned > 0 {
            warn!(
                "Worker {} finished without reporting {} indices; returned to the pool",
                id, outcome.returned
            );
        }
        if outcome.finished {
            session.finish_work();
        }

        if run.check_completion() {
            let counts = run.counts();
            info!(
                "Run {} completed ({} completed, {} failed)",
                run.id(),
                counts.completed,
                counts.failed
            );
            for worker in self.sessions.values_mut() {
                worker.finish_work();
            }
        } else if outcome.finished {
            self.rebalance();
        }
        self.publish();
    }

    /// Splits the unassigned pool over idle workers in registration order.
    fn rebalance(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if !run.is_running() {
            return;
        }
        let mut idle: Vec<(u64, Arc<str>)> = self
            .sessions
            .values()
            .filter(|session| session.is_idle())
            .map(|session| (session.registration_seq, Arc::clone(&session.id)))
            .collect();
        if idle.is_empty() {
            return;
        }
        idle.sort_unstable_by_key(|(seq, _)| *seq);
        let workers: Vec<Arc<str>> = idle.into_iter().map(|(_, id)| id).collect();

        let pool = run.pool();
        for (worker, range) in partition(&pool, &workers) {
            if let Err(err) = run.assign(range, &worker) {
                warn!("Skipping assignment of {} to {}: {}", range, worker, err);
                continue;
            }
            let Some(session) = self.sessions.get_mut(&worker) else {
                continue;
            };
            session.begin_work(range);
            info!(
                "Assigned {} to worker {} for run {}",
                range,
                worker,
                run.id()
            );
            session.send(WireMessage::Assign(AssignMessage {
                run_id: run.id().to_owned(),
                range: Some(range),
            }));
        }
    }

    fn notify_if_idle(&self, id: &Arc<str>) {
        let Some(run) = self.run.as_ref().filter(|run| run.is_running()) else {
            return;
        };
        if let Some(session) = self.sessions.get(id)
            && session.is_idle()
        {
            session.send(WireMessage::Assign(AssignMessage {
                run_id: run.id().to_owned(),
                range: None,
            }));
        }
    }

    pub(crate) fn start_run(&mut self, total: u64) -> Result<String, CoordinatorError> {
        if let Some(run) = self.run.as_ref()
            && run.is_active()
        {
            return Err(CoordinatorError::RunInProgress {
                run_id: run.id().to_owned(),
            });
        }
        if !self.listening {
            return Err(CoordinatorError::NotRunning);
        }
        let counter = self.run_counter.saturating_add(1);
        let mut run = Run::new(build_run_id(counter), total)?;
        self.run_counter = counter;
        run.start();
        let run_id = run.id().to_owned();
        info!(
            "Run {} started with {} iterations ({} workers connected)",
            run_id,
            total,
            self.live_workers()
        );
        self.run = Some(run);

        self.rebalance();
        let idle: Vec<Arc<str>> = self
            .sessions
            .values()
            .filter(|session| session.is_idle())
            .map(|session| Arc::clone(&session.id))
            .collect();
        for id in &idle {
            self.notify_if_idle(id);
        }
        self.publish();
        Ok(run_id)
    }

    pub(crate) fn abort_run(&mut self, run_id: &str) -> Result<(), CoordinatorError> {
        let known = self
            .run
            .as_ref()
            .is_some_and(|run| run.id() == run_id && run.is_active());
        if !known {
            return Err(CoordinatorError::UnknownRun {
                run_id: run_id.to_owned(),
            });
        }
        self.abort_current("aborted on request");
        self.publish();
        Ok(())
    }

    /// Aborts the active run, frees every assignment and tells live workers.
    fn abort_current(&mut self, reason: &str) -> bool {
        let Some(run) = self.run.as_mut() else {
            return false;
        };
        if !run.abort() {
            return false;
        }
        let run_id = run.id().to_owned();
        for session in self.sessions.values_mut().filter(|session| session.is_live()) {
            if let Some(range) = session.assigned_range {
                run.release(range, &session.id);
            }
            session.finish_work();
            session.send(WireMessage::Abort(AbortMessage {
                run_id: run_id.clone(),
            }));
        }
        info!("Run {} aborted: {}", run_id, reason);
        true
    }

    /// Periodic sweep: heartbeats, registration deadlines, eviction and the
    /// idle-abort watchdog.
    pub(crate) fn on_tick(&mut self, now: Instant) {
        let timeout_ms = duration_to_ms(self.heartbeat.timeout());
        for id in self.heartbeat.expired(&self.sessions, now) {
            let err = CoordinatorError::WorkerTimeout {
                worker_id: id.as_ref().to_owned(),
                timeout_ms,
            };
            self.drop_misbehaving(&id, &err, now);
        }

        let register_timeout = self.settings.register_timeout;
        let stale: Vec<ConnectionId> = self
            .pending
            .iter()
            .filter(|(_, pending)| {
                now.saturating_duration_since(pending.opened_at) > register_timeout
            })
            .map(|(connection, _)| *connection)
            .collect();
        let err = CoordinatorError::RegisterTimeout {
            timeout_ms: duration_to_ms(register_timeout),
        };
        for connection in stale {
            self.reject_pending(connection, &err);
        }

        let mut changed = false;
        let grace = self.settings.eviction_grace;
        let before = self.sessions.len();
        self.sessions.retain(|_, session| {
            session.is_live()
                || session
                    .disconnected_at
                    .is_none_or(|at| now.saturating_duration_since(at) < grace)
        });
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            debug!("Evicted {} disconnected sessions", evicted);
            changed = true;
        }

        let live = self.live_workers();
        let idle_grace = self.settings.idle_abort_grace;
        if let Some(run) = self.run.as_mut()
            && run.idle_expired(live, now, idle_grace)
        {
            warn!(
                "Run {} has had no workers for over {}ms",
                run.id(),
                idle_grace.map_or(0, duration_to_ms)
            );
            changed |= self.abort_current("no workers connected");
        }

        if changed {
            self.publish();
        }
    }

    /// Aborts the run, tells every worker to go away and stops listening.
    pub(crate) fn shutdown(&mut self, reason: &str, now: Instant) {
        self.listening = false;
        self.abort_current(reason);
        for (_, pending) in self.pending.drain() {
            pending.send(WireMessage::Shutdown(ShutdownMessage {
                reason: reason.to_owned(),
            }));
            pending.close();
        }
        for session in self.sessions.values_mut().filter(|session| session.is_live()) {
            session.send(WireMessage::Shutdown(ShutdownMessage {
                reason: reason.to_owned(),
            }));
            // Any range was already released by the abort above.
            drop(session.disconnect(now));
        }
        self.connections.clear();
        info!("Coordinator stopped: {}", reason);
        self.publish();
    }

    fn live_workers(&self) -> usize {
        self.sessions
            .values()
            .filter(|session| session.is_live())
            .count()
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        let mut sessions: Vec<&WorkerSession> = self.sessions.values().collect();
        sessions.sort_unstable_by_key(|session| session.registration_seq);
        let workers = sessions
            .into_iter()
            .map(|session| WorkerSnapshot {
                id: session.id.as_ref().to_owned(),
                state: session.state,
                platform: session.platform.clone(),
                runtime_version: session.runtime_version.clone(),
                connected_at: session.connected_at,
                assigned_range: session.assigned_range,
                progress: session.progress,
            })
            .collect();

        let (run_id, status, total, counts) = self.run.as_ref().map_or_else(
            || (None, None, 0, LedgerCounts::default()),
            |run| {
                (
                    Some(run.id().to_owned()),
                    Some(run.status()),
                    run.total(),
                    run.counts(),
                )
            },
        );

        StatusSnapshot {
            sequence: 0,
            listening: self.listening,
            port: self.port,
            expected_workers: self.settings.expected_workers,
            run_id,
            status,
            total,
            completed: counts.completed,
            failed: counts.failed,
            unassigned: counts.unassigned,
            assigned: counts.assigned,
            workers,
        }
    }

    pub(crate) fn publish(&self) {
        let snapshot = self.publisher.publish(self.snapshot());
        debug!("Published snapshot {}", snapshot.sequence);
    }
}

fn describe_peer(peer: Option<SocketAddr>) -> String {
    peer.map_or_else(|| "unknown peer".to_owned(), |addr| addr.to_string())
}
