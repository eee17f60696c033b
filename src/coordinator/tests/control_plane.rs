use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::coordinator::{Coordinator, accept_control_connections};
use crate::error::{AppError, AppResult};

use super::handle::{local_settings, start_or_skip};
use super::run_async_test;

const TOKEN: &str = "s3cret";

async fn http_request(
    addr: SocketAddr,
    method: &str,
    path: &str,
    token: Option<&str>,
    body: &str,
) -> AppResult<(u16, serde_json::Value)> {
    let mut socket = TcpStream::connect(addr).await?;
    let auth = token
        .map(|value| format!("Authorization: Bearer {}\r\n", value))
        .unwrap_or_default();
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
        method,
        path,
        auth,
        body.len(),
        body
    );
    socket.write_all(request.as_bytes()).await?;
    let mut response = Vec::new();
    socket.read_to_end(&mut response).await?;
    let text = String::from_utf8(response)
        .map_err(|err| AppError::coordinator(format!("Response not UTF-8: {}", err)))?;
    let (head, payload) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| AppError::coordinator(format!("Malformed response: {}", text)))?;
    let status = head
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| AppError::coordinator(format!("Missing status line: {}", head)))?;
    Ok((status, serde_json::from_str(payload)?))
}

#[test]
fn control_plane_maps_coordinator_errors() -> AppResult<()> {
    run_async_test(async {
        let mut coordinator = Coordinator::new(local_settings());
        if start_or_skip(&mut coordinator).await?.is_none() {
            return Ok(());
        }
        let client = coordinator
            .client()
            .ok_or_else(|| AppError::coordinator("Missing client after start"))?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(accept_control_connections(
            listener,
            Some(TOKEN.to_owned()),
            client,
        ));

        let (status, _) = http_request(addr, "GET", "/status", None, "").await?;
        if status != 401 {
            return Err(AppError::coordinator(format!("Expected 401, got {}", status)));
        }

        let (status, _) =
            http_request(addr, "POST", "/runs", Some(TOKEN), r#"{"total":0}"#).await?;
        if status != 400 {
            return Err(AppError::coordinator(format!("Expected 400, got {}", status)));
        }

        let oversized = format!(r#"{{"total":{}}}"#, u64::MAX);
        let (status, _) = http_request(addr, "POST", "/runs", Some(TOKEN), &oversized).await?;
        if status != 400 {
            return Err(AppError::coordinator(format!(
                "Expected 400 for an oversized run, got {}",
                status
            )));
        }

        let (status, body) =
            http_request(addr, "POST", "/runs", Some(TOKEN), r#"{"total":3}"#).await?;
        let run_id = body
            .get("runId")
            .and_then(serde_json::Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| AppError::coordinator(format!("Missing runId in {}", body)))?;
        if status != 200 {
            return Err(AppError::coordinator(format!("Expected 200, got {}", status)));
        }

        let (status, _) =
            http_request(addr, "POST", "/runs", Some(TOKEN), r#"{"total":3}"#).await?;
        if status != 409 {
            return Err(AppError::coordinator(format!("Expected 409, got {}", status)));
        }

        let (status, _) = http_request(addr, "POST", "/runs/nope/abort", Some(TOKEN), "").await?;
        if status != 404 {
            return Err(AppError::coordinator(format!("Expected 404, got {}", status)));
        }

        let abort_path = format!("/runs/{}/abort", run_id);
        let (status, _) = http_request(addr, "POST", &abort_path, Some(TOKEN), "").await?;
        if status != 200 {
            return Err(AppError::coordinator(format!("Expected 200, got {}", status)));
        }

        let (status, body) = http_request(addr, "GET", "/status", Some(TOKEN), "").await?;
        if status != 200
            || body.get("status").and_then(serde_json::Value::as_str) != Some("aborted")
            || body.get("runId").and_then(serde_json::Value::as_str) != Some(run_id.as_str())
        {
            return Err(AppError::coordinator(format!(
                "Unexpected status response {}: {}",
                status, body
            )));
        }

        server.abort();
        coordinator.stop().await;
        Ok(())
    })
}

async fn raw_exchange(addr: SocketAddr, parts: &[&str]) -> AppResult<String> {
    let mut socket = TcpStream::connect(addr).await?;
    for part in parts {
        socket.write_all(part.as_bytes()).await?;
        socket.flush().await?;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let mut response = Vec::new();
    socket.read_to_end(&mut response).await?;
    String::from_utf8(response)
        .map_err(|err| AppError::coordinator(format!("Response not UTF-8: {}", err)))
}

#[test]
fn control_plane_reads_split_bodies_and_rejects_oversized_requests() -> AppResult<()> {
    run_async_test(async {
        let mut coordinator = Coordinator::new(local_settings());
        if start_or_skip(&mut coordinator).await?.is_none() {
            return Ok(());
        }
        let client = coordinator
            .client()
            .ok_or_else(|| AppError::coordinator("Missing client after start"))?;
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(accept_control_connections(listener, None, client));

        let body = r#"{"total":4}"#;
        let (first, second) = body.split_at(5);
        let head = format!(
            "POST /runs?source=cli HTTP/1.1\r\nhost: localhost\r\ncontent-length: {}\r\n\r\n",
            body.len()
        );
        let response = raw_exchange(addr, &[head.as_str(), first, second]).await?;
        if !response.starts_with("HTTP/1.1 200 OK") || !response.contains("\"started\"") {
            return Err(AppError::coordinator(format!(
                "Split request not served: {}",
                response
            )));
        }
        if coordinator.latest_snapshot().total != 4 {
            return Err(AppError::coordinator("Split body did not start a 4-iteration run"));
        }

        let response = raw_exchange(
            addr,
            &["POST /runs HTTP/1.1\r\nContent-Length: 1048576\r\n\r\n"],
        )
        .await?;
        if !response.starts_with("HTTP/1.1 413 Payload Too Large") {
            return Err(AppError::coordinator(format!(
                "Expected 413, got {}",
                response
            )));
        }

        let response = raw_exchange(addr, &["GARBAGE\r\n\r\n"]).await?;
        if !response.starts_with("HTTP/1.1 400 Bad Request") {
            return Err(AppError::coordinator(format!(
                "Expected 400, got {}",
                response
            )));
        }

        server.abort();
        coordinator.stop().await;
        Ok(())
    })
}
