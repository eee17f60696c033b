use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_async;
use tracing::{debug, warn};

use crate::error::CoordinatorError;
use crate::protocol::{Frame, decode_frame, encode_message};

use super::events::{ConnectionEvent, ConnectionId, Outbound};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Accepts worker sockets; each handshake must finish within
/// `handshake_timeout` or the socket is dropped.
pub(super) async fn accept_workers(
    listener: TcpListener,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    handshake_timeout: Duration,
) {
    let mut next_connection: ConnectionId = 0;
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(result) => result,
            Err(err) => {
                warn!("Failed to accept worker connection: {}", err);
                continue;
            }
        };
        next_connection = next_connection.wrapping_add(1);
        tokio::spawn(serve_connection(
            stream,
            peer,
            next_connection,
            event_tx.clone(),
            handshake_timeout,
        ));
    }
}

/// Runs the WebSocket handshake, then pumps frames in both directions until
/// either side closes. Exactly one `Closed` event is emitted per `Opened`.
async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    connection: ConnectionId,
    event_tx: mpsc::UnboundedSender<ConnectionEvent>,
    handshake_timeout: Duration,
) {
    let socket = match tokio::time::timeout(handshake_timeout, accept_async(stream)).await {
        Ok(Ok(socket)) => socket,
        Ok(Err(err)) => {
            debug!("WebSocket handshake with {} failed: {}", peer, err);
            return;
        }
        Err(_elapsed) => {
            debug!(
                "WebSocket handshake with {} timed out after {:?}",
                peer, handshake_timeout
            );
            return;
        }
    };
    let (mut sink, mut source) = socket.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
    if event_tx
        .send(ConnectionEvent::Opened {
            connection,
            peer: Some(peer),
            outbound: out_tx,
        })
        .is_err()
    {
        return;
    }

    let mut writer = tokio::spawn(async move {
        while let Some(outbound) = out_rx.recv().await {
            let message = match outbound {
                Outbound::Message(message) => message,
                Outbound::Close => break,
            };
            let frame = match encode_message(&message) {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Dropping {} for connection {}: {}", message.kind(), connection, err);
                    continue;
                }
            };
            if let Err(err) = sink.send(frame).await {
                return Err(CoordinatorError::WebSocket {
                    context: "send to worker",
                    source: Box::new(err),
                });
            }
        }
        if tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await.is_err() {
            debug!("Connection {} did not acknowledge close in time", connection);
        }
        Ok(())
    });

    let reason = loop {
        tokio::select! {
            frame = source.next() => {
                let Some(frame) = frame else {
                    break CoordinatorError::ConnectionClosed.to_string();
                };
                let frame = match frame {
                    Ok(frame) => frame,
                    Err(err) => {
                        break CoordinatorError::WebSocket {
                            context: "read from worker",
                            source: Box::new(err),
                        }
                        .to_string();
                    }
                };
                let event = match decode_frame(frame) {
                    Ok(Frame::Message(message)) => ConnectionEvent::Inbound { connection, message },
                    Ok(Frame::Control) => continue,
                    Ok(Frame::Closed) => break "Closed by worker.".to_owned(),
                    Err(CoordinatorError::MalformedMessage { reason }) => {
                        ConnectionEvent::Malformed { connection, reason }
                    }
                    Err(err) => ConnectionEvent::Malformed {
                        connection,
                        reason: err.to_string(),
                    },
                };
                if event_tx.send(event).is_err() {
                    break "Coordinator stopped.".to_owned();
                }
            }
            result = &mut writer => {
                break match result {
                    Ok(Ok(())) => "Closed by coordinator.".to_owned(),
                    Ok(Err(err)) => err.to_string(),
                    Err(err) => format!("Writer task failed: {}", err),
                };
            }
        }
    };

    writer.abort();
    if event_tx
        .send(ConnectionEvent::Closed { connection, reason })
        .is_err()
    {
        // Control loop is gone; nothing left to notify.
    }
}
