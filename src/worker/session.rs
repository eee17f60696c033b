use std::mem;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tracing::{debug, info, warn};

use crate::error::{AppError, AppResult, WorkerError};
use crate::protocol::{
    AssignMessage, Frame, HeartbeatMessage, IterationRange, ProgressMessage, RegisterMessage,
    ResultMessage, WireMessage, decode_frame, encode_message,
};

use super::command::WorkerCommand;
use super::executor::{IterationExecutor, IterationOutcome};
use super::settings::{WorkerSettings, platform};

/// How an assignment ended.
enum AssignmentEnd {
    Finished,
    Aborted,
    Replaced(AssignMessage),
    Shutdown(String),
    Failed(AppError),
}

/// Indices executed since the last `result` message.
struct ResultBatch {
    start: u64,
    completed: Vec<u64>,
    failed: Vec<u64>,
}

impl ResultBatch {
    const fn new(start: u64) -> Self {
        Self {
            start,
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    fn record(&mut self, index: u64, outcome: IterationOutcome) {
        match outcome {
            IterationOutcome::Completed => self.completed.push(index),
            IterationOutcome::Failed => self.failed.push(index),
        }
    }

    fn len(&self) -> usize {
        self.completed.len().saturating_add(self.failed.len())
    }

    /// Intermediate report covering `start..=through`.
    fn flush(&mut self, run_id: &str, through: u64) -> AppResult<WireMessage> {
        let range = IterationRange::new(self.start, through)?;
        self.start = through.saturating_add(1);
        Ok(WireMessage::Result(ResultMessage {
            run_id: run_id.to_owned(),
            range,
            completed_indices: mem::take(&mut self.completed),
            failed_indices: mem::take(&mut self.failed),
        }))
    }

    /// Final report; the full range tells the coordinator the worker is done.
    fn finish(self, run_id: &str, assigned: IterationRange) -> WireMessage {
        WireMessage::Result(ResultMessage {
            run_id: run_id.to_owned(),
            range: assigned,
            completed_indices: self.completed,
            failed_indices: self.failed,
        })
    }
}

/// Connects, registers and serves assignments until the coordinator shuts
/// the session down or the connection fails.
pub(super) async fn run_worker_session<TExecutor>(
    settings: &WorkerSettings,
    executor: &TExecutor,
) -> AppResult<()>
where
    TExecutor: IterationExecutor + ?Sized,
{
    let addr = settings.connect.as_str().to_owned();
    info!("Connecting to coordinator {}", addr);
    let (socket, _response) = connect_async(addr.as_str()).await.map_err(|err| {
        AppError::worker(WorkerError::Connection {
            addr: addr.clone(),
            source: Box::new(err),
        })
    })?;
    info!("Connected to coordinator {}", addr);

    let (mut sink, mut source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WireMessage>();
    let writer_handle = tokio::spawn(async move {
        while let Some(message) = out_rx.recv().await {
            let frame = match encode_message(&message) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Dropping {} message: {}", message.kind(), err);
                    continue;
                }
            };
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        if sink.close().await.is_err() {
            // Coordinator already closed the socket.
        }
    });

    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<WorkerCommand>();
    let reader_addr = addr.clone();
    let reader_handle = tokio::spawn(async move {
        loop {
            let command = match source.next().await {
                Some(Ok(frame)) => match decode_frame(frame) {
                    Ok(Frame::Message(message)) => match to_command(message) {
                        Some(command) => command,
                        None => continue,
                    },
                    Ok(Frame::Control) => continue,
                    Ok(Frame::Closed) => WorkerCommand::Disconnected(AppError::worker(
                        WorkerError::CoordinatorClosed,
                    )),
                    Err(err) => WorkerCommand::Error(AppError::coordinator(err)),
                },
                Some(Err(err)) => {
                    WorkerCommand::Disconnected(AppError::worker(WorkerError::Connection {
                        addr: reader_addr.clone(),
                        source: Box::new(err),
                    }))
                }
                None => WorkerCommand::Disconnected(AppError::worker(
                    WorkerError::CoordinatorClosed,
                )),
            };
            let disconnected = matches!(command, WorkerCommand::Disconnected(_));
            if cmd_tx.send(command).is_err() || disconnected {
                break;
            }
        }
    });

    let register = WireMessage::Register(RegisterMessage {
        id: settings.id.clone(),
        platform: platform(),
        runtime_version: env!("CARGO_PKG_VERSION").to_owned(),
    });
    send_wire(&out_tx, register)?;
    debug!("Sent register as {}", settings.id);

    let heartbeat_interval = settings.heartbeat_interval;
    let heartbeat_tx = out_tx.clone();
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(heartbeat_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if send_wire(&heartbeat_tx, WireMessage::Heartbeat(HeartbeatMessage {})).is_err() {
                break;
            }
        }
    });

    let mut queued: Option<AssignMessage> = None;
    let session_result = loop {
        let command = if let Some(assign) = queued.take() {
            WorkerCommand::Assign(assign)
        } else {
            match cmd_rx.recv().await {
                Some(command) => command,
                None => break Err(AppError::worker(WorkerError::CoordinatorClosed)),
            }
        };

        match command {
            WorkerCommand::Assign(AssignMessage {
                run_id,
                range: Some(range),
            }) => {
                let end =
                    run_assignment(settings, executor, &run_id, range, &out_tx, &mut cmd_rx).await;
                match end {
                    AssignmentEnd::Finished | AssignmentEnd::Aborted => {}
                    AssignmentEnd::Replaced(assign) => queued = Some(assign),
                    AssignmentEnd::Shutdown(reason) => {
                        info!("Coordinator shut down: {}", reason);
                        break Ok(());
                    }
                    AssignmentEnd::Failed(err) => break Err(err),
                }
            }
            WorkerCommand::Assign(AssignMessage {
                run_id,
                range: None,
            }) => {
                debug!("No work available yet for run {}", run_id);
            }
            WorkerCommand::Abort(abort) => {
                debug!("Ignoring abort for run {} while idle", abort.run_id);
            }
            WorkerCommand::Shutdown(shutdown) => {
                info!("Coordinator shut down: {}", shutdown.reason);
                break Ok(());
            }
            WorkerCommand::Error(err) | WorkerCommand::Disconnected(err) => break Err(err),
        }
    };

    heartbeat_handle.abort();
    drop(out_tx);
    if writer_handle.await.is_err() {
        // Writer task was cancelled.
    }
    reader_handle.abort();
    session_result
}

/// Executes `range` one index at a time, reporting in batches and yielding
/// to coordinator commands between and during iterations.
async fn run_assignment<TExecutor>(
    settings: &WorkerSettings,
    executor: &TExecutor,
    run_id: &str,
    range: IterationRange,
    out_tx: &mpsc::UnboundedSender<WireMessage>,
    cmd_rx: &mut mpsc::UnboundedReceiver<WorkerCommand>,
) -> AssignmentEnd
where
    TExecutor: IterationExecutor + ?Sized,
{
    info!("Assigned iterations {} of run {}", range, run_id);
    let mut batch = ResultBatch::new(range.start());
    let mut completed_so_far = 0u64;
    let mut last_progress = Instant::now();

    for index in range.indices() {
        let execution = executor.execute(run_id, index);
        tokio::pin!(execution);
        let outcome = loop {
            tokio::select! {
                outcome = &mut execution => break outcome,
                command = cmd_rx.recv() => {
                    if let Some(end) = interrupt(command, run_id) {
                        return end;
                    }
                }
            }
        };
        batch.record(index, outcome);
        completed_so_far = completed_so_far.saturating_add(1);

        if index == range.end() {
            break;
        }
        if batch.len() >= settings.result_batch {
            let sent = batch
                .flush(run_id, index)
                .and_then(|message| send_wire(out_tx, message));
            if let Err(err) = sent {
                return AssignmentEnd::Failed(err);
            }
        }
        if last_progress.elapsed() >= settings.heartbeat_interval {
            last_progress = Instant::now();
            let progress = WireMessage::Progress(ProgressMessage {
                run_id: run_id.to_owned(),
                completed_so_far,
            });
            if let Err(err) = send_wire(out_tx, progress) {
                return AssignmentEnd::Failed(err);
            }
        }
    }

    info!("Finished iterations {} of run {}", range, run_id);
    match send_wire(out_tx, batch.finish(run_id, range)) {
        Ok(()) => AssignmentEnd::Finished,
        Err(err) => AssignmentEnd::Failed(err),
    }
}

fn interrupt(command: Option<WorkerCommand>, run_id: &str) -> Option<AssignmentEnd> {
    match command {
        Some(WorkerCommand::Abort(abort)) => {
            if abort.run_id == run_id {
                info!("Run {} aborted by coordinator", run_id);
                Some(AssignmentEnd::Aborted)
            } else {
                debug!("Ignoring abort for inactive run {}", abort.run_id);
                None
            }
        }
        Some(WorkerCommand::Assign(assign)) => {
            warn!(
                "Coordinator replaced the assignment for run {} while working",
                run_id
            );
            Some(AssignmentEnd::Replaced(assign))
        }
        Some(WorkerCommand::Shutdown(shutdown)) => Some(AssignmentEnd::Shutdown(shutdown.reason)),
        Some(WorkerCommand::Error(err) | WorkerCommand::Disconnected(err)) => {
            Some(AssignmentEnd::Failed(err))
        }
        None => Some(AssignmentEnd::Failed(AppError::worker(
            WorkerError::CoordinatorClosed,
        ))),
    }
}

fn to_command(message: WireMessage) -> Option<WorkerCommand> {
    match message {
        WireMessage::Assign(assign) => Some(WorkerCommand::Assign(assign)),
        WireMessage::Abort(abort) => Some(WorkerCommand::Abort(abort)),
        WireMessage::Shutdown(shutdown) => Some(WorkerCommand::Shutdown(shutdown)),
        WireMessage::Error(error) => Some(WorkerCommand::Error(AppError::worker(
            WorkerError::Rejected {
                message: error.message,
            },
        ))),
        WireMessage::Heartbeat(_) => None,
        other @ (WireMessage::Register(_) | WireMessage::Progress(_) | WireMessage::Result(_)) => {
            Some(WorkerCommand::Error(AppError::worker(
                WorkerError::UnexpectedMessage { kind: other.kind() },
            )))
        }
    }
}

fn send_wire(tx: &mpsc::UnboundedSender<WireMessage>, message: WireMessage) -> AppResult<()> {
    tx.send(message)
        .map_err(|_err| AppError::worker(WorkerError::CoordinatorClosed))
}
