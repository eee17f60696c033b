use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use super::control::{ControlError, ControlResponse, StartRunRequest};
use super::handle::CoordinatorClient;
use super::http::{ControlRequest, ErrorBody, read_control_request, write_json};

/// Serves the JSON control plane until the task is aborted.
pub async fn accept_control_connections(
    listener: TcpListener,
    auth_token: Option<String>,
    client: CoordinatorClient,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("Control plane listening on http://{}", addr);
    }
    loop {
        let (socket, _) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept control connection: {}", err);
                continue;
            }
        };
        let client = client.clone();
        let auth_token = auth_token.clone();
        tokio::spawn(async move {
            handle_control_connection(socket, auth_token.as_deref(), &client).await;
        });
    }
}

async fn handle_control_connection(
    mut socket: TcpStream,
    auth_token: Option<&str>,
    client: &CoordinatorClient,
) {
    let response = match read_control_request(&mut socket).await {
        Ok(request) => route(&request, auth_token, client).await,
        Err(err) => Err(err),
    };
    let written = match response {
        Ok(body) => write_json(&mut socket, 200, &body).await,
        Err(err) => {
            let body = ErrorBody {
                error: &err.message,
            };
            write_json(&mut socket, err.status, &body).await
        }
    };
    if let Err(err) = written {
        debug!("Control client went away: {}", err);
    }
}

async fn route(
    request: &ControlRequest,
    auth_token: Option<&str>,
    client: &CoordinatorClient,
) -> Result<serde_json::Value, ControlError> {
    if let Some(token) = auth_token {
        let expected = format!("Bearer {}", token);
        if request.authorization.as_deref() != Some(expected.as_str()) {
            return Err(ControlError::new(401, "Unauthorized"));
        }
    }

    let segments = request.segments();

    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["status"]) => to_json(&*client.latest_snapshot()),
        ("POST", ["runs"]) => {
            let start = serde_json::from_slice::<StartRunRequest>(&request.body)
                .map_err(|err| ControlError::new(400, format!("Invalid JSON: {}", err)))?;
            let run_id = client.start_run(start.total).await?;
            to_json(&ControlResponse {
                status: "started",
                run_id,
            })
        }
        ("POST", ["runs", run_id, "abort"]) => {
            client.abort_run(run_id).await?;
            to_json(&ControlResponse {
                status: "aborted",
                run_id: (*run_id).to_owned(),
            })
        }
        (_, ["status"] | ["runs"] | ["runs", _, "abort"]) => {
            Err(ControlError::new(405, "Method not allowed"))
        }
        _ => Err(ControlError::new(404, "Not found")),
    }
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<serde_json::Value, ControlError> {
    serde_json::to_value(value)
        .map_err(|err| ControlError::new(500, format!("Failed to encode response: {}", err)))
}
