use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use serde::Deserialize;

use crate::args::HttpMethod;
use crate::error::ValidationError;

/// Top-level config file with one table per subcommand.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub coordinator: Option<CoordinatorConfig>,
    pub worker: Option<WorkerConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    pub bind: Option<IpAddr>,
    pub port: Option<u16>,
    pub expected_workers: Option<usize>,
    pub heartbeat_interval: Option<DurationValue>,
    pub heartbeat_misses: Option<u64>,
    pub eviction_grace: Option<DurationValue>,
    /// `0` disables the idle abort.
    pub idle_abort_grace: Option<DurationValue>,
    pub register_timeout: Option<DurationValue>,
    pub snapshot_capacity: Option<usize>,
    pub control_listen: Option<SocketAddr>,
    pub control_auth_token: Option<String>,
    pub iterations: Option<u64>,
    pub exit_on_finish: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerConfig {
    pub connect: Option<String>,
    pub id: Option<String>,
    pub url: Option<String>,
    pub method: Option<HttpMethod>,
    pub headers: Option<Vec<String>>,
    pub data: Option<String>,
    pub data_file: Option<String>,
    pub status: Option<u16>,
    pub request_timeout: Option<DurationValue>,
    pub heartbeat_interval: Option<DurationValue>,
    pub result_batch: Option<usize>,
    pub standby: Option<bool>,
    pub reconnect: Option<DurationValue>,
}

/// Either whole seconds (`30`) or a string with a unit (`"500ms"`, `"2m"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationValue {
    Seconds(u64),
    Text(String),
}

impl DurationValue {
    pub(crate) fn to_duration(&self) -> Result<Duration, ValidationError> {
        let duration = self.to_duration_allow_zero()?;
        if duration.is_zero() {
            return Err(ValidationError::DurationZero);
        }
        Ok(duration)
    }

    pub(crate) fn to_duration_allow_zero(&self) -> Result<Duration, ValidationError> {
        match self {
            DurationValue::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            DurationValue::Text(text) => super::parse_duration_value(text),
        }
    }
}
