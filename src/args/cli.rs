use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::{Args, Parser, Subcommand};

use crate::coordinator::DEFAULT_PORT;

use super::parsers::{parse_header, parse_positive_u64, parse_positive_usize};
use super::types::{HttpMethod, PositiveU64, PositiveUsize};

#[derive(Debug, Parser, Clone)]
#[clap(
    version,
    about = "Distributed load-test coordinator for SOAP/HTTP APIs - partitions iterations across WebSocket workers, tracks liveness, and reassigns work when workers disappear."
)]
pub struct CoordArgs {
    #[command(subcommand)]
    pub command: Command,

    /// Path to config file (TOML or JSON)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the coordinator and accept worker connections
    Serve(ServeArgs),
    /// Connect to a coordinator and execute assigned iterations
    Worker(WorkerArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ServeArgs {
    /// WebSocket port for workers (0 picks a free port)
    #[arg(long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Interface to bind the worker listener on
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub bind: IpAddr,

    /// Number of workers you plan to start (shown in status output only)
    #[arg(long = "expected-workers", value_parser = parse_positive_usize)]
    pub expected_workers: Option<PositiveUsize>,

    /// Interval between coordinator heartbeats and liveness checks (ms)
    #[arg(long = "heartbeat-interval-ms", default_value = "1000", value_parser = parse_positive_u64)]
    pub heartbeat_interval_ms: PositiveU64,

    /// Missed heartbeat intervals before a worker is disconnected
    #[arg(long = "heartbeat-misses", default_value = "3", value_parser = parse_positive_u64)]
    pub heartbeat_misses: PositiveU64,

    /// How long disconnected workers stay visible in status output (ms)
    #[arg(long = "eviction-grace-ms", default_value_t = 5000)]
    pub eviction_grace_ms: u64,

    /// Abort a run after it lost all workers for this long (ms, 0 disables)
    #[arg(long = "idle-abort-grace-ms", default_value_t = 60_000)]
    pub idle_abort_grace_ms: u64,

    /// Close connections that do not register within this time (ms)
    #[arg(long = "register-timeout-ms", default_value = "10000", value_parser = parse_positive_u64)]
    pub register_timeout_ms: PositiveU64,

    /// Buffered snapshots per subscriber before the oldest are dropped
    #[arg(long = "snapshot-capacity", default_value = "64", value_parser = parse_positive_usize)]
    pub snapshot_capacity: PositiveUsize,

    /// Listen address for the HTTP control plane (e.g. 127.0.0.1:9009)
    #[arg(long = "control-listen")]
    pub control_listen: Option<SocketAddr>,

    /// Bearer token required by the HTTP control plane
    #[arg(long = "control-auth-token", env = "DIRTYSOAP_CONTROL_TOKEN")]
    pub control_auth_token: Option<String>,

    /// Start a run with this many iterations right away
    #[arg(long, value_parser = parse_positive_u64)]
    pub iterations: Option<PositiveU64>,

    /// Stop the coordinator once the started run completes or aborts
    #[arg(long = "exit-on-finish", requires = "iterations")]
    pub exit_on_finish: bool,
}

#[derive(Debug, Args, Clone)]
pub struct WorkerArgs {
    /// Coordinator WebSocket URL (e.g. ws://coordinator:8765/)
    #[arg(long, env = "DIRTYSOAP_CONNECT")]
    pub connect: Option<String>,

    /// Worker id (defaults to <hostname>-<pid>)
    #[arg(long)]
    pub id: Option<String>,

    /// Target URL requested once per iteration
    #[arg(long, short)]
    pub url: Option<String>,

    /// HTTP method to use
    #[arg(long, short = 'X', default_value = "post", ignore_case = true)]
    pub method: HttpMethod,

    /// HTTP headers in 'Key: Value' format (repeatable)
    #[arg(long = "header", short = 'H', value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Request body; {{iteration}} and {{run_id}} are substituted
    #[arg(long, short)]
    pub data: Option<String>,

    /// Request body from file
    #[arg(long = "data-file", short = 'D', conflicts_with = "data")]
    pub data_file: Option<String>,

    /// HTTP status counted as a successful iteration
    #[arg(long = "status", default_value_t = 200)]
    pub expected_status: u16,

    /// Per-request timeout (ms)
    #[arg(long = "request-timeout-ms", default_value = "30000", value_parser = parse_positive_u64)]
    pub request_timeout_ms: PositiveU64,

    /// Interval between worker heartbeats and progress updates (ms)
    #[arg(long = "heartbeat-interval-ms", default_value = "1000", value_parser = parse_positive_u64)]
    pub heartbeat_interval_ms: PositiveU64,

    /// Iterations per intermediate result message
    #[arg(long = "result-batch", default_value = "50", value_parser = parse_positive_usize)]
    pub result_batch: PositiveUsize,

    /// Keep reconnecting after the coordinator goes away
    #[arg(long)]
    pub standby: bool,

    /// Delay between reconnect attempts in standby mode (ms)
    #[arg(long = "reconnect-ms", default_value = "2000", value_parser = parse_positive_u64)]
    pub reconnect_ms: PositiveU64,
}
