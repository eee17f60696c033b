//! Core library for the `dirtysoap-coord` CLI.
//!
//! The crate splits a fixed number of load-test iterations across workers
//! connected over WebSocket: the [`coordinator`] partitions work, tracks
//! liveness and reassigns ranges from lost workers, while the [`worker`]
//! agent executes iterations and reports outcomes. The wire format lives in
//! [`protocol`].
pub mod args;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod logger;
pub mod protocol;
pub mod shutdown;
pub mod worker;

#[cfg(feature = "fuzzing")]
pub mod fuzzing;
