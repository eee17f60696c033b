use std::time::Duration;

use url::Url;

use crate::error::{AppError, AppResult, WorkerError};

pub const DEFAULT_WORKER_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_RESULT_BATCH: usize = 50;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Connection and reporting behaviour of one worker agent.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub connect: Url,
    pub id: String,
    pub heartbeat_interval: Duration,
    /// Indices per intermediate `result` message.
    pub result_batch: usize,
    /// Reconnect after the session ends instead of returning.
    pub standby: bool,
    pub reconnect_delay: Duration,
}

impl WorkerSettings {
    /// Settings with defaults for everything but the coordinator URL and id.
    ///
    /// # Errors
    ///
    /// Returns an error when `connect` is not a `ws://` or `wss://` URL.
    pub fn new(connect: &str, id: Option<String>) -> AppResult<Self> {
        Ok(Self {
            connect: parse_connect_url(connect)?,
            id: id.unwrap_or_else(default_worker_id),
            heartbeat_interval: DEFAULT_WORKER_HEARTBEAT_INTERVAL,
            result_batch: DEFAULT_RESULT_BATCH,
            standby: false,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
        })
    }
}

/// Parses and checks a coordinator URL.
///
/// # Errors
///
/// Returns `InvalidConnectUrl` or `UnsupportedScheme`.
pub fn parse_connect_url(raw: &str) -> AppResult<Url> {
    let url = Url::parse(raw.trim()).map_err(|err| {
        AppError::worker(WorkerError::InvalidConnectUrl {
            url: raw.to_owned(),
            source: err,
        })
    })?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        _ => Err(AppError::worker(WorkerError::UnsupportedScheme {
            url: raw.to_owned(),
        })),
    }
}

pub(crate) fn default_worker_id() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_err| "worker".to_owned());
    format!("{}-{}", host, std::process::id())
}

pub(crate) fn platform() -> String {
    format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH)
}
