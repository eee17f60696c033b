use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8765;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_HEARTBEAT_MISSES: u32 = 3;
pub const DEFAULT_EVICTION_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_IDLE_ABORT_GRACE: Duration = Duration::from_secs(60);
pub const DEFAULT_REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_SNAPSHOT_CAPACITY: usize = 64;

/// Tunables for one coordinator instance.
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub bind_host: IpAddr,
    pub heartbeat_interval: Duration,
    pub heartbeat_misses: u32,
    /// How long a disconnected session stays visible in snapshots.
    pub eviction_grace: Duration,
    /// `None` keeps a run alive with zero workers forever.
    pub idle_abort_grace: Option<Duration>,
    pub register_timeout: Duration,
    pub snapshot_capacity: usize,
    pub expected_workers: Option<usize>,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            bind_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_misses: DEFAULT_HEARTBEAT_MISSES,
            eviction_grace: DEFAULT_EVICTION_GRACE,
            idle_abort_grace: Some(DEFAULT_IDLE_ABORT_GRACE),
            register_timeout: DEFAULT_REGISTER_TIMEOUT,
            snapshot_capacity: DEFAULT_SNAPSHOT_CAPACITY,
            expected_workers: None,
        }
    }
}

impl CoordinatorSettings {
    /// Silence longer than this marks a worker unresponsive.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_interval
            .saturating_mul(self.heartbeat_misses.max(1))
    }
}
