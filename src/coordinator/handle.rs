use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::{AppError, AppResult, CoordinatorError};

use super::connections::accept_workers;
use super::control_loop::run_control_loop;
use super::events::{ConnectionEvent, ControlCommand};
use super::run::validate_total;
use super::settings::CoordinatorSettings;
use super::snapshot::{SnapshotPublisher, StatusSnapshot};
use super::state::CoordinatorState;

const RESPONSE_TIMEOUT: Duration = Duration::from_secs(5);
const STOP_TIMEOUT: Duration = Duration::from_secs(3);

/// Owner-facing handle for one coordinator instance.
///
/// Instances are independent: each owns its listener, control loop and
/// snapshot channels.
pub struct Coordinator {
    settings: CoordinatorSettings,
    publisher: Arc<SnapshotPublisher>,
    running: Option<RunningCoordinator>,
}

struct RunningCoordinator {
    client: CoordinatorClient,
    loop_handle: JoinHandle<()>,
    accept_handle: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        // The control loop shuts itself down once its sender is gone.
        if let Some(running) = self.running.take() {
            running.accept_handle.abort();
        }
    }
}

/// Cloneable command side of a started coordinator.
#[derive(Clone)]
pub struct CoordinatorClient {
    control_tx: mpsc::UnboundedSender<ControlCommand>,
    publisher: Arc<SnapshotPublisher>,
}

impl Coordinator {
    #[must_use]
    pub fn new(settings: CoordinatorSettings) -> Self {
        let publisher = Arc::new(SnapshotPublisher::new(settings.snapshot_capacity));
        Self {
            settings,
            publisher,
            running: None,
        }
    }

    #[must_use]
    pub const fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    /// Binds the worker listener and spawns the control loop.
    ///
    /// Port `0` picks a free port; the bound address is returned.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyRunning` when started twice and `Bind` when the port
    /// is unavailable.
    pub async fn start(&mut self, port: u16) -> AppResult<SocketAddr> {
        if self.running.is_some() {
            return Err(AppError::coordinator(CoordinatorError::AlreadyRunning));
        }
        let addr = SocketAddr::new(self.settings.bind_host, port);
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            AppError::coordinator(CoordinatorError::Bind {
                addr: addr.to_string(),
                source: err,
            })
        })?;
        let local_addr = listener.local_addr().map_err(|err| {
            AppError::coordinator(CoordinatorError::Io {
                context: "read listener address",
                source: err,
            })
        })?;

        let (event_tx, event_rx) = mpsc::unbounded_channel::<ConnectionEvent>();
        let (control_tx, control_rx) = mpsc::unbounded_channel::<ControlCommand>();
        let state = CoordinatorState::new(
            self.settings.clone(),
            Arc::clone(&self.publisher),
            Some(local_addr.port()),
        );
        let loop_handle = tokio::spawn(run_control_loop(state, control_rx, event_rx));
        let accept_handle = tokio::spawn(accept_workers(
            listener,
            event_tx,
            self.settings.register_timeout,
        ));
        info!("Coordinator listening on ws://{}", local_addr);

        self.running = Some(RunningCoordinator {
            client: CoordinatorClient {
                control_tx,
                publisher: Arc::clone(&self.publisher),
            },
            loop_handle,
            accept_handle,
            local_addr,
        });
        Ok(local_addr)
    }

    /// Sends `shutdown` to every worker, aborts any active run and releases
    /// the socket. Safe to call when not running.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let RunningCoordinator {
            client,
            loop_handle,
            accept_handle,
            local_addr,
        } = running;

        accept_handle.abort();
        if let Err(err) = accept_handle.await
            && !err.is_cancelled()
        {
            debug!("Accept task ended abnormally: {}", err);
        }

        let (respond_to, response_rx) = oneshot::channel();
        let command = ControlCommand::Stop {
            reason: "Coordinator stopped.".to_owned(),
            respond_to,
        };
        if client.control_tx.send(command).is_ok()
            && tokio::time::timeout(STOP_TIMEOUT, response_rx).await.is_err()
        {
            debug!("Control loop did not acknowledge stop in time");
        }
        drop(client);

        let abort_handle = loop_handle.abort_handle();
        if tokio::time::timeout(STOP_TIMEOUT, loop_handle).await.is_err() {
            abort_handle.abort();
        }
        info!("Coordinator on {} stopped", local_addr);
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.running.is_some()
    }

    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Command handle for other tasks, present while started.
    #[must_use]
    pub fn client(&self) -> Option<CoordinatorClient> {
        self.running.as_ref().map(|running| running.client.clone())
    }

    /// Starts a run over `[0, total)` and returns its id.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for `total == 0` or a total above
    /// [`MAX_RUN_TOTAL`](super::MAX_RUN_TOTAL), `NotRunning` before
    /// `start`, or `RunInProgress` while another run is active.
    pub async fn start_run(&self, total: u64) -> AppResult<String> {
        validate_total(total)?;
        self.running_client()?.start_run(total).await
    }

    /// Aborts the active run.
    ///
    /// # Errors
    ///
    /// Returns `UnknownRun` when `run_id` is not the active run.
    pub async fn abort_run(&self, run_id: &str) -> AppResult<()> {
        self.running_client()?.abort_run(run_id).await
    }

    /// Receiver of every published snapshot. Slow receivers lose the oldest
    /// entries.
    #[must_use]
    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<Arc<StatusSnapshot>> {
        self.publisher.subscribe()
    }

    /// Watch cell always holding the latest snapshot.
    #[must_use]
    pub fn watch_snapshots(&self) -> watch::Receiver<Arc<StatusSnapshot>> {
        self.publisher.watch()
    }

    #[must_use]
    pub fn latest_snapshot(&self) -> Arc<StatusSnapshot> {
        self.publisher.latest()
    }

    /// Invokes `callback` for each new snapshot in sequence order on a
    /// spawned task. Must be called inside a tokio runtime.
    pub fn subscribe_with<F>(&self, mut callback: F) -> JoinHandle<()>
    where
        F: FnMut(Arc<StatusSnapshot>) + Send + 'static,
    {
        let mut updates = self.publisher.subscribe();
        tokio::spawn(async move {
            let mut last_sequence = 0u64;
            loop {
                match updates.recv().await {
                    Ok(snapshot) => {
                        if snapshot.sequence <= last_sequence {
                            continue;
                        }
                        last_sequence = snapshot.sequence;
                        callback(snapshot);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Snapshot subscriber skipped {} updates", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    fn running_client(&self) -> AppResult<&CoordinatorClient> {
        self.running
            .as_ref()
            .map(|running| &running.client)
            .ok_or_else(|| AppError::coordinator(CoordinatorError::NotRunning))
    }
}

impl CoordinatorClient {
    /// # Errors
    ///
    /// Same as [`Coordinator::start_run`].
    pub async fn start_run(&self, total: u64) -> AppResult<String> {
        validate_total(total)?;
        let (respond_to, response_rx) = oneshot::channel();
        self.send(ControlCommand::StartRun { total, respond_to })?;
        await_response(response_rx).await
    }

    /// # Errors
    ///
    /// Same as [`Coordinator::abort_run`].
    pub async fn abort_run(&self, run_id: &str) -> AppResult<()> {
        let (respond_to, response_rx) = oneshot::channel();
        self.send(ControlCommand::AbortRun {
            run_id: run_id.to_owned(),
            respond_to,
        })?;
        await_response(response_rx).await
    }

    #[must_use]
    pub fn latest_snapshot(&self) -> Arc<StatusSnapshot> {
        self.publisher.latest()
    }

    fn send(&self, command: ControlCommand) -> AppResult<()> {
        self.control_tx
            .send(command)
            .map_err(|_err| AppError::coordinator(CoordinatorError::NotRunning))
    }
}

async fn await_response<T>(
    response_rx: oneshot::Receiver<Result<T, CoordinatorError>>,
) -> AppResult<T> {
    match tokio::time::timeout(RESPONSE_TIMEOUT, response_rx).await {
        Ok(Ok(result)) => result.map_err(AppError::coordinator),
        Ok(Err(_closed)) => Err(AppError::coordinator(
            CoordinatorError::ControlChannelClosed,
        )),
        Err(_elapsed) => Err(AppError::coordinator(CoordinatorError::ResponseTimeout)),
    }
}
