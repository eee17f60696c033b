use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::error::{AppError, AppResult};
use crate::protocol::{
    AbortMessage, AssignMessage, ErrorMessage, IterationRange, ShutdownMessage, WireMessage,
    decode_message, encode_message,
};

use super::executor::render_template;
use super::{IterationExecutor, IterationOutcome, WorkerSettings, parse_connect_url, run_worker};

const WAIT: Duration = Duration::from_secs(5);

type ServerSocket = WebSocketStream<TcpStream>;

fn run_async_test<F>(future: F) -> AppResult<()>
where
    F: std::future::Future<Output = AppResult<()>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::worker(format!("Failed to build runtime: {}", err)))?;
    runtime.block_on(future)
}

/// Fails odd indices; the `stall` iteration never finishes on its own.
struct ScriptedExecutor {
    stall: Option<(&'static str, u64)>,
}

#[async_trait]
impl IterationExecutor for ScriptedExecutor {
    async fn execute(&self, run_id: &str, index: u64) -> IterationOutcome {
        if self.stall == Some((run_id, index)) {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
        if index % 2 == 0 {
            IterationOutcome::Completed
        } else {
            IterationOutcome::Failed
        }
    }
}

async fn bind_or_skip() -> AppResult<Option<TcpListener>> {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => Ok(Some(listener)),
        Err(err) if err.kind() == std::io::ErrorKind::PermissionDenied => {
            eprintln!("Skipping worker test: {}", err);
            Ok(None)
        }
        Err(err) => Err(err.into()),
    }
}

fn settings_for(listener: &TcpListener, batch: usize) -> AppResult<WorkerSettings> {
    let addr = listener.local_addr()?;
    let mut settings = WorkerSettings::new(&format!("ws://{}/", addr), Some("w1".to_owned()))?;
    settings.result_batch = batch;
    settings.heartbeat_interval = Duration::from_millis(50);
    Ok(settings)
}

async fn accept(listener: &TcpListener) -> AppResult<ServerSocket> {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .map_err(|err| AppError::worker(format!("Worker never connected: {}", err)))??;
    accept_async(stream)
        .await
        .map_err(|err| AppError::worker(format!("Handshake failed: {}", err)))
}

async fn send(socket: &mut ServerSocket, message: &WireMessage) -> AppResult<()> {
    socket
        .send(encode_message(message)?)
        .await
        .map_err(|err| AppError::worker(format!("Send failed: {}", err)))
}

/// Next message that is neither a heartbeat nor a progress update.
async fn next_message(socket: &mut ServerSocket) -> AppResult<WireMessage> {
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .map_err(|err| AppError::worker(format!("No message from worker: {}", err)))?
            .ok_or_else(|| AppError::worker("Worker closed the socket"))?
            .map_err(|err| AppError::worker(format!("Read failed: {}", err)))?;
        let Ok(text) = frame.into_text() else {
            continue;
        };
        if text.is_empty() {
            continue;
        }
        let message = decode_message(&text)?;
        if !matches!(message, WireMessage::Heartbeat(_) | WireMessage::Progress(_)) {
            return Ok(message);
        }
    }
}

async fn expect_register(socket: &mut ServerSocket) -> AppResult<()> {
    match next_message(socket).await? {
        WireMessage::Register(register) if register.id == "w1" && !register.platform.is_empty() => {
            Ok(())
        }
        other => Err(AppError::worker(format!("Expected register, got {:?}", other))),
    }
}

fn assign(run_id: &str, start: u64, end: u64) -> AppResult<WireMessage> {
    Ok(WireMessage::Assign(AssignMessage {
        run_id: run_id.to_owned(),
        range: Some(IterationRange::new(start, end)?),
    }))
}

fn expect_result(
    message: &WireMessage,
    run_id: &str,
    start: u64,
    end: u64,
    completed: &[u64],
    failed: &[u64],
) -> AppResult<()> {
    match message {
        WireMessage::Result(result)
            if result.run_id == run_id
                && result.range == IterationRange::new(start, end)?
                && result.completed_indices == completed
                && result.failed_indices == failed =>
        {
            Ok(())
        }
        other => Err(AppError::worker(format!(
            "Expected result {}-{} for {}, got {:?}",
            start, end, run_id, other
        ))),
    }
}

#[test]
fn reports_batches_then_full_range_and_exits_on_shutdown() -> AppResult<()> {
    run_async_test(async {
        let Some(listener) = bind_or_skip().await? else {
            return Ok(());
        };
        let settings = settings_for(&listener, 2)?;
        let worker = tokio::spawn(async move {
            let executor = ScriptedExecutor { stall: None };
            run_worker(&settings, &executor).await
        });

        let mut socket = accept(&listener).await?;
        expect_register(&mut socket).await?;
        send(&mut socket, &assign("run-1", 0, 4)?).await?;

        expect_result(&next_message(&mut socket).await?, "run-1", 0, 1, &[0], &[1])?;
        expect_result(&next_message(&mut socket).await?, "run-1", 2, 3, &[2], &[3])?;
        expect_result(&next_message(&mut socket).await?, "run-1", 0, 4, &[4], &[])?;

        send(
            &mut socket,
            &WireMessage::Shutdown(ShutdownMessage {
                reason: "done".to_owned(),
            }),
        )
        .await?;
        tokio::time::timeout(WAIT, worker)
            .await
            .map_err(|err| AppError::worker(format!("Worker did not exit: {}", err)))???;
        Ok(())
    })
}

#[test]
fn abort_stops_assignment_and_next_run_proceeds() -> AppResult<()> {
    run_async_test(async {
        let Some(listener) = bind_or_skip().await? else {
            return Ok(());
        };
        let settings = settings_for(&listener, 2)?;
        let worker = tokio::spawn(async move {
            let executor = ScriptedExecutor {
                stall: Some(("run-1", 2)),
            };
            run_worker(&settings, &executor).await
        });

        let mut socket = accept(&listener).await?;
        expect_register(&mut socket).await?;
        send(&mut socket, &assign("run-1", 0, 9)?).await?;
        expect_result(&next_message(&mut socket).await?, "run-1", 0, 1, &[0], &[1])?;

        send(
            &mut socket,
            &WireMessage::Abort(AbortMessage {
                run_id: "run-1".to_owned(),
            }),
        )
        .await?;
        send(&mut socket, &assign("run-2", 0, 0)?).await?;
        expect_result(&next_message(&mut socket).await?, "run-2", 0, 0, &[0], &[])?;

        send(
            &mut socket,
            &WireMessage::Shutdown(ShutdownMessage {
                reason: "done".to_owned(),
            }),
        )
        .await?;
        tokio::time::timeout(WAIT, worker)
            .await
            .map_err(|err| AppError::worker(format!("Worker did not exit: {}", err)))???;
        Ok(())
    })
}

#[test]
fn rejection_ends_worker_with_error() -> AppResult<()> {
    run_async_test(async {
        let Some(listener) = bind_or_skip().await? else {
            return Ok(());
        };
        let settings = settings_for(&listener, 10)?;
        let worker = tokio::spawn(async move {
            let executor: Arc<dyn IterationExecutor> = Arc::new(ScriptedExecutor { stall: None });
            run_worker(&settings, executor.as_ref()).await
        });

        let mut socket = accept(&listener).await?;
        expect_register(&mut socket).await?;
        send(
            &mut socket,
            &WireMessage::Error(ErrorMessage {
                message: "Worker id 'w1' is already registered.".to_owned(),
            }),
        )
        .await?;
        if socket.close(None).await.is_err() {
            // Worker may already be gone.
        }

        let result = tokio::time::timeout(WAIT, worker)
            .await
            .map_err(|err| AppError::worker(format!("Worker did not exit: {}", err)))??;
        match result {
            Err(err) if err.to_string().contains("already registered") => Ok(()),
            other => Err(AppError::worker(format!(
                "Expected rejection error, got {:?}",
                other
            ))),
        }
    })
}

#[test]
fn connect_url_requires_websocket_scheme() -> AppResult<()> {
    parse_connect_url("ws://127.0.0.1:8765/")?;
    parse_connect_url("wss://coordinator.example/")?;
    if parse_connect_url("http://127.0.0.1:8765/").is_ok() {
        return Err(AppError::worker("http:// must be rejected"));
    }
    if parse_connect_url("not a url").is_ok() {
        return Err(AppError::worker("Garbage must be rejected"));
    }
    let settings = WorkerSettings::new("ws://localhost:1/", None)?;
    if settings.id.is_empty() || settings.result_batch == 0 {
        return Err(AppError::worker("Defaults must be usable"));
    }
    Ok(())
}

#[test]
fn template_substitutes_iteration_variables() -> AppResult<()> {
    let vars = BTreeMap::from([
        ("iteration".to_owned(), "7".to_owned()),
        ("run_id".to_owned(), "run-1".to_owned()),
    ]);
    let rendered = render_template(
        "<MessageID>{{run_id}}-{{ iteration }}</MessageID>{{other}}{{",
        &vars,
    );
    if rendered != "<MessageID>run-1-7</MessageID>{{other}}{{" {
        return Err(AppError::worker(format!("Unexpected render: {}", rendered)));
    }
    Ok(())
}
