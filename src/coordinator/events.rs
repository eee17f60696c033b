use std::net::SocketAddr;

use tokio::sync::{mpsc, oneshot};

use crate::error::CoordinatorError;
use crate::protocol::WireMessage;

pub(crate) type ConnectionId = u64;

/// Instructions for a connection's writer task.
#[derive(Debug)]
pub(crate) enum Outbound {
    Message(WireMessage),
    Close,
}

/// Everything a connection task reports to the control loop.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Opened {
        connection: ConnectionId,
        peer: Option<SocketAddr>,
        outbound: mpsc::UnboundedSender<Outbound>,
    },
    Inbound {
        connection: ConnectionId,
        message: WireMessage,
    },
    Malformed {
        connection: ConnectionId,
        reason: String,
    },
    Closed {
        connection: ConnectionId,
        reason: String,
    },
}

pub(crate) enum ControlCommand {
    StartRun {
        total: u64,
        respond_to: oneshot::Sender<Result<String, CoordinatorError>>,
    },
    AbortRun {
        run_id: String,
        respond_to: oneshot::Sender<Result<(), CoordinatorError>>,
    },
    Stop {
        reason: String,
        respond_to: oneshot::Sender<()>,
    },
}
