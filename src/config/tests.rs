use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use tempfile::tempdir;

use super::types::{ConfigFile, DurationValue};
use super::{apply_config, load_config_file, parse_duration_value};
use crate::args::{Command, CoordArgs, HttpMethod, ServeArgs, WorkerArgs};
use crate::error::{AppError, AppResult};

fn write_config(name: &str, content: &str) -> AppResult<(tempfile::TempDir, ConfigFile)> {
    let dir = tempdir()?;
    let path = dir.path().join(name);
    std::fs::write(&path, content)?;
    let config = load_config_file(&path)?;
    Ok((dir, config))
}

fn parse_with_config(argv: &[&str], config: &ConfigFile) -> AppResult<CoordArgs> {
    let matches = CoordArgs::command().try_get_matches_from(argv)?;
    let mut args = CoordArgs::from_arg_matches(&matches)?;
    apply_config(&mut args, &matches, config)?;
    Ok(args)
}

fn serve_args(args: CoordArgs) -> AppResult<ServeArgs> {
    match args.command {
        Command::Serve(serve) => Ok(serve),
        Command::Worker(_) => Err(AppError::config("Expected serve subcommand")),
    }
}

fn worker_args(args: CoordArgs) -> AppResult<WorkerArgs> {
    match args.command {
        Command::Worker(worker) => Ok(worker),
        Command::Serve(_) => Err(AppError::config("Expected worker subcommand")),
    }
}

#[test]
fn parse_toml_config_with_both_tables() -> AppResult<()> {
    let (_dir, config) = write_config(
        "dirtysoap.toml",
        r#"
[coordinator]
port = 9100
heartbeat_interval = "250ms"
idle_abort_grace = 0
control_listen = "127.0.0.1:9009"

[worker]
connect = "ws://127.0.0.1:9100/"
method = "post"
headers = ["Content-Type: text/xml"]
result_batch = 20
"#,
    )?;
    let coordinator = config
        .coordinator
        .as_ref()
        .ok_or_else(|| AppError::config("Expected coordinator table"))?;
    if coordinator.port != Some(9100) {
        return Err(AppError::config("Unexpected port"));
    }
    if coordinator.control_listen.map(|addr| addr.port()) != Some(9009) {
        return Err(AppError::config("Unexpected control listen"));
    }
    let worker = config
        .worker
        .as_ref()
        .ok_or_else(|| AppError::config("Expected worker table"))?;
    if worker.method != Some(HttpMethod::Post) || worker.result_batch != Some(20) {
        return Err(AppError::config("Unexpected worker values"));
    }
    Ok(())
}

#[test]
fn parse_json_config() -> AppResult<()> {
    let (_dir, config) = write_config(
        "dirtysoap.json",
        r#"{ "worker": { "url": "http://localhost/soap", "status": 202, "standby": true } }"#,
    )?;
    let worker = config
        .worker
        .ok_or_else(|| AppError::config("Expected worker table"))?;
    if worker.url.as_deref() != Some("http://localhost/soap")
        || worker.status != Some(202)
        || worker.standby != Some(true)
    {
        return Err(AppError::config("Unexpected worker values"));
    }
    if config.coordinator.is_some() {
        return Err(AppError::config("Coordinator table should be absent"));
    }
    Ok(())
}

#[test]
fn rejects_unknown_keys_and_extensions() -> AppResult<()> {
    let dir = tempdir()?;
    let toml_path = dir.path().join("bad.toml");
    std::fs::write(&toml_path, "[coordinator]\nprot = 1\n")?;
    if load_config_file(&toml_path).is_ok() {
        return Err(AppError::config("Expected unknown key to fail"));
    }
    let yaml_path = dir.path().join("config.yaml");
    std::fs::write(&yaml_path, "coordinator: {}\n")?;
    match load_config_file(&yaml_path) {
        Err(err) if err.to_string().contains("yaml") => Ok(()),
        other => Err(AppError::config(format!(
            "Expected unsupported extension, got {:?}",
            other
        ))),
    }
}

#[test]
fn config_fills_values_not_given_on_cli() -> AppResult<()> {
    let (_dir, config) = write_config(
        "dirtysoap.toml",
        r#"
[coordinator]
port = 9100
heartbeat_interval = "250ms"
heartbeat_misses = 5
idle_abort_grace = 0
eviction_grace = "2s"
iterations = 100
exit_on_finish = true
"#,
    )?;
    let serve = serve_args(parse_with_config(
        &["dirtysoap-coord", "serve", "--port", "7000"],
        &config,
    )?)?;
    if serve.port != 7000 {
        return Err(AppError::config("CLI port must win over config"));
    }
    if serve.heartbeat_interval_ms.get() != 250 || serve.heartbeat_misses.get() != 5 {
        return Err(AppError::config("Heartbeat values not applied"));
    }
    if serve.idle_abort_grace_ms != 0 || serve.eviction_grace_ms != 2000 {
        return Err(AppError::config("Grace values not applied"));
    }
    if serve.iterations.map(crate::args::PositiveU64::get) != Some(100) || !serve.exit_on_finish
    {
        return Err(AppError::config("Run values not applied"));
    }
    Ok(())
}

#[test]
fn worker_config_respects_cli_precedence() -> AppResult<()> {
    let (_dir, config) = write_config(
        "dirtysoap.toml",
        r#"
[worker]
connect = "ws://config-host:8765/"
id = "from-config"
method = "put"
headers = ["SOAPAction: urn:Ping"]
reconnect = "500ms"
"#,
    )?;
    let worker = worker_args(parse_with_config(
        &["dirtysoap-coord", "worker", "--id", "from-cli"],
        &config,
    )?)?;
    if worker.id.as_deref() != Some("from-cli") {
        return Err(AppError::config("CLI id must win over config"));
    }
    if worker.connect.as_deref() != Some("ws://config-host:8765/") {
        return Err(AppError::config("Connect not applied"));
    }
    if worker.method != HttpMethod::Put || worker.headers.len() != 1 {
        return Err(AppError::config("Method/headers not applied"));
    }
    if worker.reconnect_ms.get() != 500 {
        return Err(AppError::config("Reconnect not applied"));
    }
    Ok(())
}

#[test]
fn zero_positive_values_are_rejected() -> AppResult<()> {
    let (_serve_dir, serve_config) = write_config(
        "dirtysoap.toml",
        "[coordinator]\nheartbeat_interval = 0\n",
    )?;
    if parse_with_config(&["dirtysoap-coord", "serve"], &serve_config).is_ok() {
        return Err(AppError::config("Expected zero heartbeat interval to fail"));
    }
    let (_worker_dir, worker_config) =
        write_config("dirtysoap.toml", "[worker]\nresult_batch = 0\n")?;
    if parse_with_config(&["dirtysoap-coord", "worker"], &worker_config).is_ok() {
        return Err(AppError::config("Expected zero result batch to fail"));
    }
    Ok(())
}

#[test]
fn parse_duration_units() -> AppResult<()> {
    let cases = [
        ("250ms", Duration::from_millis(250)),
        ("3", Duration::from_secs(3)),
        ("2m", Duration::from_secs(120)),
        ("1h", Duration::from_secs(3600)),
    ];
    for (input, expected) in cases {
        let parsed = parse_duration_value(input)?;
        if parsed != expected {
            return Err(AppError::config(format!(
                "Unexpected duration for {}: {:?}",
                input, parsed
            )));
        }
    }
    for input in ["", "ms", "5d"] {
        if parse_duration_value(input).is_ok() {
            return Err(AppError::config(format!("Expected '{}' to fail", input)));
        }
    }
    if DurationValue::Seconds(0).to_duration().is_ok() {
        return Err(AppError::config("Zero must fail where positive is required"));
    }
    Ok(())
}
