use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{AppError, AppResult, CoordinatorError};

use super::control::ControlError;

/// Control requests carry at most `{"total": n}`.
const MAX_CONTROL_REQUEST_BYTES: usize = 8 * 1024;
const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// The parts of a control-plane request the router looks at.
pub(super) struct ControlRequest {
    pub(super) method: String,
    pub(super) path: String,
    pub(super) authorization: Option<String>,
    pub(super) body: Vec<u8>,
}

impl ControlRequest {
    /// Path without the query string, split on `/`.
    pub(super) fn segments(&self) -> Vec<&str> {
        let path = self
            .path
            .split_once('?')
            .map_or(self.path.as_str(), |(path, _query)| path);
        path.split('/').filter(|segment| !segment.is_empty()).collect()
    }
}

/// Reads one request, head and body, into a buffer capped at
/// `MAX_CONTROL_REQUEST_BYTES`.
pub(super) async fn read_control_request(
    socket: &mut TcpStream,
) -> Result<ControlRequest, ControlError> {
    let mut buffer: Vec<u8> = Vec::with_capacity(512);
    let mut head_len: Option<usize> = None;
    let mut content_length = 0usize;

    loop {
        if let Some(head) = head_len
            && buffer.len() >= head.saturating_add(content_length)
        {
            break;
        }
        let mut chunk = [0u8; 512];
        let bytes = socket
            .read(&mut chunk)
            .await
            .map_err(|err| ControlError::new(400, format!("Failed to read request: {}", err)))?;
        if bytes == 0 {
            if head_len.is_some() {
                break;
            }
            return Err(ControlError::new(400, "Empty request"));
        }
        buffer.extend_from_slice(chunk.get(..bytes).unwrap_or_default());
        if buffer.len() > MAX_CONTROL_REQUEST_BYTES {
            return Err(ControlError::new(413, "Request too large"));
        }
        if head_len.is_none()
            && let Some(pos) = buffer
                .windows(HEAD_TERMINATOR.len())
                .position(|window| window == HEAD_TERMINATOR)
        {
            let head = head_text(buffer.get(..pos).unwrap_or_default())?;
            content_length = header_value(head, "content-length")
                .map(|value| {
                    value
                        .parse::<usize>()
                        .map_err(|_err| ControlError::new(400, "Invalid Content-Length"))
                })
                .transpose()?
                .unwrap_or(0);
            if content_length > MAX_CONTROL_REQUEST_BYTES {
                return Err(ControlError::new(413, "Request too large"));
            }
            head_len = Some(pos.saturating_add(HEAD_TERMINATOR.len()));
        }
    }

    let head_end = head_len.unwrap_or(buffer.len());
    let head = head_text(buffer.get(..head_end).unwrap_or_default())?;
    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(path)) = (request_line.next(), request_line.next()) else {
        return Err(ControlError::new(400, "Malformed request line"));
    };
    let authorization = header_value(head, "authorization").map(str::to_owned);
    let body_end = head_end.saturating_add(content_length).min(buffer.len());
    let body = buffer.get(head_end..body_end).unwrap_or_default().to_vec();

    Ok(ControlRequest {
        method: method.to_owned(),
        path: path.to_owned(),
        authorization,
        body,
    })
}

fn head_text(bytes: &[u8]) -> Result<&str, ControlError> {
    std::str::from_utf8(bytes)
        .map_err(|_err| ControlError::new(400, "Request head is not UTF-8"))
}

fn header_value<'head>(head: &'head str, name: &str) -> Option<&'head str> {
    head.lines().skip(1).find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim().eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

const fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        413 => "Payload Too Large",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Internal Server Error",
    }
}

/// Writes `value` as a JSON response and closes the exchange.
pub(super) async fn write_json<T>(socket: &mut TcpStream, status: u16, value: &T) -> AppResult<()>
where
    T: Serialize + ?Sized,
{
    let body = serde_json::to_vec(value).map_err(|err| {
        AppError::coordinator(CoordinatorError::Serialize {
            context: "control response",
            source: err,
        })
    })?;
    let mut response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        status,
        reason_phrase(status),
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(&body);
    socket.write_all(&response).await.map_err(|err| {
        AppError::coordinator(CoordinatorError::Io {
            context: "write control response",
            source: err,
        })
    })
}

#[derive(Serialize)]
pub(super) struct ErrorBody<'msg> {
    pub(super) error: &'msg str,
}
