//! Worker agent: connects to a coordinator, executes assigned iterations and
//! reports their outcomes.
mod command;
mod executor;
mod session;
mod settings;

#[cfg(test)]
mod tests;

use tracing::{info, warn};

use crate::error::AppResult;

pub use executor::{
    DEFAULT_EXPECTED_STATUS, DEFAULT_REQUEST_TIMEOUT, HttpIterationExecutor, HttpRequestSpec,
    IterationExecutor, IterationOutcome,
};
pub use settings::{
    DEFAULT_RECONNECT_DELAY, DEFAULT_RESULT_BATCH, DEFAULT_WORKER_HEARTBEAT_INTERVAL,
    WorkerSettings, parse_connect_url,
};

#[cfg(feature = "fuzzing")]
pub(crate) use executor::render_template;

/// Runs the worker loop.
///
/// Without standby the first session decides the result; with standby the
/// worker reconnects after `reconnect_delay` whenever a session ends.
///
/// # Errors
///
/// Returns an error if the worker cannot connect, is rejected, or loses the
/// coordinator while standby is off.
pub async fn run_worker<TExecutor>(settings: &WorkerSettings, executor: &TExecutor) -> AppResult<()>
where
    TExecutor: IterationExecutor + ?Sized,
{
    info!(
        "Worker {} starting (standby={}, reconnect={}ms)",
        settings.id,
        settings.standby,
        settings.reconnect_delay.as_millis()
    );

    loop {
        let result = session::run_worker_session(settings, executor).await;
        match result {
            Ok(()) => {
                if !settings.standby {
                    return Ok(());
                }
            }
            Err(err) => {
                if !settings.standby {
                    return Err(err);
                }
                warn!("Worker session error: {}", err);
            }
        }
        tokio::time::sleep(settings.reconnect_delay).await;
    }
}
