use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use dirtysoap_coord::args::{Command, CoordArgs, PositiveUsize, ServeArgs, WorkerArgs};
use dirtysoap_coord::config::{apply_config, load_config};
use dirtysoap_coord::coordinator::{
    Coordinator, CoordinatorSettings, RunStatus, StatusSnapshot, accept_control_connections,
};
use dirtysoap_coord::error::{
    AppError, AppResult, ConfigError, CoordinatorError, ValidationError, WorkerError,
};
use dirtysoap_coord::logger::init_logging;
use dirtysoap_coord::shutdown::{setup_signal_shutdown_handler, shutdown_channel};
use dirtysoap_coord::worker::{
    HttpIterationExecutor, HttpRequestSpec, WorkerSettings, run_worker,
};

pub(crate) fn run() -> AppResult<()> {
    let matches = CoordArgs::command().get_matches();
    let mut args = CoordArgs::from_arg_matches(&matches)?;
    init_logging(args.verbose);

    if let Some(config) = load_config(args.config.as_deref())? {
        apply_config(&mut args, &matches, &config)?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_async(args))
}

async fn run_async(args: CoordArgs) -> AppResult<()> {
    match args.command {
        Command::Serve(serve) => run_serve(serve).await,
        Command::Worker(worker) => run_worker_command(worker).await,
    }
}

async fn run_serve(args: ServeArgs) -> AppResult<()> {
    let mut coordinator = Coordinator::new(coordinator_settings(&args));
    let addr = coordinator.start(args.port).await?;
    info!("Workers connect with: worker --connect ws://{}/", addr);

    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);

    let control_handle = match args.control_listen {
        Some(listen) => Some(
            spawn_control_plane(listen, args.control_auth_token.clone(), &coordinator).await?,
        ),
        None => None,
    };

    let mut transitions = TransitionLog::default();
    let log_handle = coordinator.subscribe_with(move |snapshot| transitions.observe(&snapshot));

    let started_run = match args.iterations {
        Some(total) => Some(coordinator.start_run(total.get()).await?),
        None => None,
    };
    let awaited_run = started_run.filter(|_| args.exit_on_finish);
    let mut snapshots = coordinator.watch_snapshots();
    let finished = async {
        match awaited_run.as_deref() {
            Some(run_id) => wait_for_run_end(&mut snapshots, run_id).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = shutdown_rx.recv() => info!("Shutdown requested"),
        () = finished => info!("Run finished, stopping coordinator"),
    }

    coordinator.stop().await;
    info!("Final status: {}", coordinator.latest_snapshot());

    if let Some(handle) = control_handle {
        handle.abort();
    }
    log_handle.abort();
    drop(shutdown_tx.send(()));
    if signal_handle.await.is_err() {
        debug!("Signal handler task ended abnormally");
    }
    Ok(())
}

async fn spawn_control_plane(
    listen: SocketAddr,
    auth_token: Option<String>,
    coordinator: &Coordinator,
) -> AppResult<JoinHandle<()>> {
    let client = coordinator
        .client()
        .ok_or_else(|| AppError::coordinator(CoordinatorError::NotRunning))?;
    let listener = TcpListener::bind(listen).await.map_err(|err| {
        AppError::coordinator(CoordinatorError::Bind {
            addr: listen.to_string(),
            source: err,
        })
    })?;
    if auth_token.is_none() {
        warn!("Control plane on {} has no auth token", listen);
    }
    info!("Control plane listening on http://{}", listen);
    Ok(tokio::spawn(accept_control_connections(
        listener, auth_token, client,
    )))
}

async fn wait_for_run_end(snapshots: &mut watch::Receiver<Arc<StatusSnapshot>>, run_id: &str) {
    let ended = snapshots
        .wait_for(|snapshot| {
            snapshot.run_id.as_deref() == Some(run_id)
                && matches!(
                    snapshot.status,
                    Some(RunStatus::Completed | RunStatus::Aborted)
                )
        })
        .await;
    match ended {
        Ok(snapshot) if snapshot.status == Some(RunStatus::Aborted) => {
            warn!("Run {} aborted", run_id);
        }
        Ok(_) => info!("Run {} completed", run_id),
        Err(_closed) => debug!("Snapshot channel closed while waiting for {}", run_id),
    }
}

/// Logs run status and worker-count changes at info, everything else at
/// debug.
#[derive(Default)]
struct TransitionLog {
    status: Option<RunStatus>,
    run_id: Option<String>,
    live_workers: usize,
}

impl TransitionLog {
    fn observe(&mut self, snapshot: &StatusSnapshot) {
        let live_workers = snapshot.live_workers();
        let changed = self.status != snapshot.status
            || self.run_id != snapshot.run_id
            || self.live_workers != live_workers;
        if changed {
            info!("{}", snapshot);
            self.status = snapshot.status;
            self.run_id.clone_from(&snapshot.run_id);
            self.live_workers = live_workers;
        } else {
            debug!("{}", snapshot);
        }
    }
}

fn coordinator_settings(args: &ServeArgs) -> CoordinatorSettings {
    CoordinatorSettings {
        bind_host: args.bind,
        heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms.get()),
        heartbeat_misses: u32::try_from(args.heartbeat_misses.get()).unwrap_or(u32::MAX),
        eviction_grace: Duration::from_millis(args.eviction_grace_ms),
        idle_abort_grace: (args.idle_abort_grace_ms > 0)
            .then(|| Duration::from_millis(args.idle_abort_grace_ms)),
        register_timeout: Duration::from_millis(args.register_timeout_ms.get()),
        snapshot_capacity: args.snapshot_capacity.get(),
        expected_workers: args.expected_workers.map(PositiveUsize::get),
    }
}

async fn run_worker_command(args: WorkerArgs) -> AppResult<()> {
    let settings = worker_settings(&args)?;
    let executor = HttpIterationExecutor::new(request_spec(&args)?)?;

    let (shutdown_tx, mut shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);
    let result = tokio::select! {
        result = run_worker(&settings, &executor) => result,
        _ = shutdown_rx.recv() => {
            info!("Worker {} interrupted", settings.id);
            Ok(())
        }
    };

    drop(shutdown_tx.send(()));
    if signal_handle.await.is_err() {
        debug!("Signal handler task ended abnormally");
    }
    result
}

fn worker_settings(args: &WorkerArgs) -> AppResult<WorkerSettings> {
    let connect = args.connect.as_deref().ok_or_else(|| {
        AppError::worker(WorkerError::MissingOption {
            option: "--connect",
        })
    })?;
    let mut settings = WorkerSettings::new(connect, args.id.clone())?;
    settings.heartbeat_interval = Duration::from_millis(args.heartbeat_interval_ms.get());
    settings.result_batch = args.result_batch.get();
    settings.standby = args.standby;
    settings.reconnect_delay = Duration::from_millis(args.reconnect_ms.get());
    Ok(settings)
}

fn request_spec(args: &WorkerArgs) -> AppResult<HttpRequestSpec> {
    let url = args
        .url
        .clone()
        .ok_or_else(|| AppError::validation(ValidationError::MissingTargetUrl))?;
    let body = match args.data_file.as_deref() {
        Some(path) => Some(std::fs::read_to_string(path).map_err(|err| {
            AppError::config(ConfigError::ReadDataFile {
                path: PathBuf::from(path),
                source: err,
            })
        })?),
        None => args.data.clone(),
    };
    Ok(HttpRequestSpec {
        url,
        method: args.method,
        headers: args.headers.clone(),
        body,
        expected_status: args.expected_status,
        timeout: Duration::from_millis(args.request_timeout_ms.get()),
    })
}
