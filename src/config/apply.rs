use std::time::Duration;

use clap::ArgMatches;
use clap::parser::ValueSource;

use crate::args::{Command, CoordArgs, PositiveU64, PositiveUsize, ServeArgs, WorkerArgs, parse_header};
use crate::error::{AppError, AppResult, ConfigError};

use super::types::{ConfigFile, CoordinatorConfig, DurationValue, WorkerConfig};

/// Applies configuration values to CLI arguments. Values given explicitly on
/// the command line are kept.
///
/// # Errors
///
/// Returns an error when config values are invalid.
pub fn apply_config(
    args: &mut CoordArgs,
    matches: &ArgMatches,
    config: &ConfigFile,
) -> AppResult<()> {
    match &mut args.command {
        Command::Serve(serve) => {
            if let Some(section) = config.coordinator.as_ref()
                && let Some(sub_matches) = matches.subcommand_matches("serve")
            {
                apply_coordinator_config(serve, sub_matches, section)?;
            }
        }
        Command::Worker(worker) => {
            if let Some(section) = config.worker.as_ref()
                && let Some(sub_matches) = matches.subcommand_matches("worker")
            {
                apply_worker_config(worker, sub_matches, section)?;
            }
        }
    }
    Ok(())
}

fn apply_coordinator_config(
    args: &mut ServeArgs,
    matches: &ArgMatches,
    config: &CoordinatorConfig,
) -> AppResult<()> {
    if !is_cli(matches, "bind")
        && let Some(bind) = config.bind
    {
        args.bind = bind;
    }

    if !is_cli(matches, "port")
        && let Some(port) = config.port
    {
        args.port = port;
    }

    if !is_cli(matches, "expected_workers")
        && let Some(expected) = config.expected_workers
    {
        args.expected_workers = Some(ensure_positive_usize(
            expected,
            "coordinator.expected_workers",
        )?);
    }

    if !is_cli(matches, "heartbeat_interval_ms")
        && let Some(interval) = config.heartbeat_interval.as_ref()
    {
        args.heartbeat_interval_ms =
            positive_millis(interval, "coordinator.heartbeat_interval")?;
    }

    if !is_cli(matches, "heartbeat_misses")
        && let Some(misses) = config.heartbeat_misses
    {
        args.heartbeat_misses = ensure_positive_u64(misses, "coordinator.heartbeat_misses")?;
    }

    if !is_cli(matches, "eviction_grace_ms")
        && let Some(grace) = config.eviction_grace.as_ref()
    {
        args.eviction_grace_ms = millis(grace, "coordinator.eviction_grace")?;
    }

    if !is_cli(matches, "idle_abort_grace_ms")
        && let Some(grace) = config.idle_abort_grace.as_ref()
    {
        args.idle_abort_grace_ms = millis(grace, "coordinator.idle_abort_grace")?;
    }

    if !is_cli(matches, "register_timeout_ms")
        && let Some(timeout) = config.register_timeout.as_ref()
    {
        args.register_timeout_ms = positive_millis(timeout, "coordinator.register_timeout")?;
    }

    if !is_cli(matches, "snapshot_capacity")
        && let Some(capacity) = config.snapshot_capacity
    {
        args.snapshot_capacity =
            ensure_positive_usize(capacity, "coordinator.snapshot_capacity")?;
    }

    if !is_cli(matches, "control_listen")
        && let Some(listen) = config.control_listen
    {
        args.control_listen = Some(listen);
    }

    if !is_cli(matches, "control_auth_token")
        && let Some(token) = config.control_auth_token.clone()
    {
        args.control_auth_token = Some(token);
    }

    if !is_cli(matches, "iterations")
        && let Some(iterations) = config.iterations
    {
        args.iterations = Some(ensure_positive_u64(iterations, "coordinator.iterations")?);
    }

    if !is_cli(matches, "exit_on_finish")
        && let Some(exit_on_finish) = config.exit_on_finish
    {
        args.exit_on_finish = exit_on_finish;
    }

    Ok(())
}

fn apply_worker_config(
    args: &mut WorkerArgs,
    matches: &ArgMatches,
    config: &WorkerConfig,
) -> AppResult<()> {
    if !is_cli(matches, "connect")
        && let Some(connect) = config.connect.clone()
    {
        args.connect = Some(connect);
    }

    if !is_cli(matches, "id")
        && let Some(id) = config.id.clone()
    {
        args.id = Some(id);
    }

    if !is_cli(matches, "url")
        && let Some(url) = config.url.clone()
    {
        args.url = Some(url);
    }

    if !is_cli(matches, "method")
        && let Some(method) = config.method
    {
        args.method = method;
    }

    if !is_cli(matches, "headers")
        && let Some(headers) = config.headers.as_ref()
    {
        args.headers = parse_headers(headers)?;
    }

    if !is_cli(matches, "data")
        && !is_cli(matches, "data_file")
        && let Some(data) = config.data.clone()
    {
        args.data = Some(data);
    }

    if !is_cli(matches, "data_file")
        && !is_cli(matches, "data")
        && let Some(path) = config.data_file.clone()
    {
        args.data_file = Some(path);
    }

    if !is_cli(matches, "expected_status")
        && let Some(status) = config.status
    {
        args.expected_status = status;
    }

    if !is_cli(matches, "request_timeout_ms")
        && let Some(timeout) = config.request_timeout.as_ref()
    {
        args.request_timeout_ms = positive_millis(timeout, "worker.request_timeout")?;
    }

    if !is_cli(matches, "heartbeat_interval_ms")
        && let Some(interval) = config.heartbeat_interval.as_ref()
    {
        args.heartbeat_interval_ms = positive_millis(interval, "worker.heartbeat_interval")?;
    }

    if !is_cli(matches, "result_batch")
        && let Some(batch) = config.result_batch
    {
        args.result_batch = ensure_positive_usize(batch, "worker.result_batch")?;
    }

    if !is_cli(matches, "standby")
        && let Some(standby) = config.standby
    {
        args.standby = standby;
    }

    if !is_cli(matches, "reconnect_ms")
        && let Some(reconnect) = config.reconnect.as_ref()
    {
        args.reconnect_ms = positive_millis(reconnect, "worker.reconnect")?;
    }

    Ok(())
}

fn is_cli(matches: &ArgMatches, name: &str) -> bool {
    matches.value_source(name) == Some(ValueSource::CommandLine)
}

fn ensure_positive_u64(value: u64, field: &str) -> AppResult<PositiveU64> {
    PositiveU64::try_from(value).map_err(|err| {
        AppError::config(ConfigError::FieldMustBePositive {
            field: field.to_owned(),
            source: err,
        })
    })
}

fn ensure_positive_usize(value: usize, field: &str) -> AppResult<PositiveUsize> {
    PositiveUsize::try_from(value).map_err(|err| {
        AppError::config(ConfigError::FieldMustBePositive {
            field: field.to_owned(),
            source: err,
        })
    })
}

fn millis(value: &DurationValue, field: &'static str) -> AppResult<u64> {
    value
        .to_duration_allow_zero()
        .map(duration_to_ms)
        .map_err(|err| AppError::config(ConfigError::InvalidDuration { field, source: err }))
}

fn positive_millis(value: &DurationValue, field: &'static str) -> AppResult<PositiveU64> {
    let duration = value
        .to_duration()
        .map_err(|err| AppError::config(ConfigError::InvalidDuration { field, source: err }))?;
    ensure_positive_u64(duration_to_ms(duration), field)
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_headers(headers: &[String]) -> AppResult<Vec<(String, String)>> {
    let mut parsed = Vec::with_capacity(headers.len());
    for header in headers {
        parsed.push(
            parse_header(header)
                .map_err(|err| AppError::config(ConfigError::InvalidHeader { source: err }))?,
        );
    }
    Ok(parsed)
}
