//! Distributed run coordinator.
//!
//! A [`Coordinator`] accepts worker WebSocket connections, splits each run's
//! iteration space across idle workers, reassigns work when a worker goes
//! away and publishes [`StatusSnapshot`]s after every state change. All
//! mutable state lives in one control loop task; connection tasks and the
//! public handle talk to it through channels.
mod connections;
mod control;
mod control_http;
mod control_loop;
mod events;
mod handle;
mod heartbeat;
mod http;
mod ledger;
mod partition;
mod run;
mod session;
mod settings;
mod snapshot;
mod state;
mod utils;

pub use control_http::accept_control_connections;
pub use handle::{Coordinator, CoordinatorClient};
pub use ledger::{BatchOutcome, IterationLedger, IterationState, LedgerCounts, LedgerError};
pub use partition::partition;
pub use run::{MAX_RUN_TOTAL, ResultOutcome, Run, RunStatus};
pub use session::WorkerState;
pub use settings::{
    CoordinatorSettings, DEFAULT_EVICTION_GRACE, DEFAULT_HEARTBEAT_INTERVAL,
    DEFAULT_HEARTBEAT_MISSES, DEFAULT_IDLE_ABORT_GRACE, DEFAULT_PORT, DEFAULT_REGISTER_TIMEOUT,
    DEFAULT_SNAPSHOT_CAPACITY,
};
pub use snapshot::{StatusSnapshot, WorkerSnapshot};
