use std::collections::BTreeMap;
use std::time::Duration;

use clap::{ArgMatches, CommandFactory, FromArgMatches};

use crate::args::{CoordArgs, PositiveU64, PositiveUsize, parse_header};
use crate::config::types::ConfigFile;
use crate::config::{apply_config, parse_duration_value};
use crate::coordinator::partition;
use crate::error::{AppError, AppResult};
use crate::protocol::{IterationRange, WireMessage, decode_message, encode_message};
use crate::worker::render_template;

thread_local! {
    static SERVE_MATCHES: ArgMatches =
        CoordArgs::command().get_matches_from(["dirtysoap-coord", "serve"]);
    static WORKER_MATCHES: ArgMatches =
        CoordArgs::command().get_matches_from(["dirtysoap-coord", "worker"]);
}

/// Parses a header string in `Key: Value` format.
///
/// # Errors
///
/// Returns an error when the header is malformed.
pub fn parse_header_input(input: &str) -> AppResult<(String, String)> {
    parse_header(input).map_err(AppError::from)
}

/// Parses a duration value from config (e.g. `10s`, `500ms`, `3`).
///
/// # Errors
///
/// Returns an error when the duration is invalid.
pub fn parse_duration_value_input(input: &str) -> AppResult<Duration> {
    parse_duration_value(input).map_err(AppError::from)
}

/// Parses a positive u64 string value.
///
/// # Errors
///
/// Returns an error when the value is invalid or zero.
pub fn parse_positive_u64_input(input: &str) -> AppResult<u64> {
    let value: PositiveU64 = input.parse()?;
    Ok(value.get())
}

/// Parses a positive usize string value.
///
/// # Errors
///
/// Returns an error when the value is invalid or zero.
pub fn parse_positive_usize_input(input: &str) -> AppResult<usize> {
    let value: PositiveUsize = input.parse()?;
    Ok(value.get())
}

#[must_use]
pub fn render_template_input(input: &str, vars: &BTreeMap<String, String>) -> String {
    render_template(input, vars)
}

/// Parses TOML config and applies it to default `serve` and `worker` args.
///
/// # Errors
///
/// Returns an error when parsing or validation fails.
pub fn apply_config_from_toml(input: &str) -> AppResult<()> {
    let config: ConfigFile = toml::from_str(input)?;
    apply_config_to_defaults(&config)
}

/// Parses JSON config and applies it to default `serve` and `worker` args.
///
/// # Errors
///
/// Returns an error when parsing or validation fails.
pub fn apply_config_from_json(input: &[u8]) -> AppResult<()> {
    let config: ConfigFile = serde_json::from_slice(input)?;
    apply_config_to_defaults(&config)
}

fn apply_config_to_defaults(config: &ConfigFile) -> AppResult<()> {
    SERVE_MATCHES.with(|matches| apply_to_matches(matches, config))?;
    WORKER_MATCHES.with(|matches| apply_to_matches(matches, config))
}

fn apply_to_matches(matches: &ArgMatches, config: &ConfigFile) -> AppResult<()> {
    let mut args = CoordArgs::from_arg_matches(matches)?;
    apply_config(&mut args, matches, config)
}

/// Decodes a wire message and re-encodes it.
///
/// # Errors
///
/// Returns an error when the text is not a valid wire message.
pub fn decode_wire_message_input(input: &str) -> AppResult<WireMessage> {
    let message = decode_message(input)?;
    encode_message(&message)?;
    Ok(message)
}

/// Partitions a pool of indices across `workers` workers.
#[must_use]
pub fn partition_input(pool: &[u64], workers: usize) -> Vec<(usize, IterationRange)> {
    let ids: Vec<usize> = (0..workers).collect();
    partition(pool, &ids)
}
