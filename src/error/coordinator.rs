use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("Bind error on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Coordinator is already running.")]
    AlreadyRunning,
    #[error("Coordinator is not running.")]
    NotRunning,
    #[error("Run {run_id} is already in progress.")]
    RunInProgress { run_id: String },
    #[error("Invalid argument '{name}': {message}")]
    InvalidArgument {
        name: &'static str,
        message: &'static str,
    },
    #[error("Unknown or finished run id {run_id}.")]
    UnknownRun { run_id: String },
    #[error("Worker id '{worker_id}' is already registered.")]
    DuplicateWorkerId { worker_id: String },
    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },
    #[error("Worker {worker_id} sent nothing for {timeout_ms}ms.")]
    WorkerTimeout { worker_id: String, timeout_ms: u64 },
    #[error("Connection did not register within {timeout_ms}ms.")]
    RegisterTimeout { timeout_ms: u64 },
    #[error("Control channel closed.")]
    ControlChannelClosed,
    #[error("Coordinator response timed out.")]
    ResponseTimeout,
    #[error("Connection closed.")]
    ConnectionClosed,
    #[error("Wire message exceeded max size ({max_bytes} bytes).")]
    WireMessageTooLarge { max_bytes: usize },
    #[error("I/O error during {context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("WebSocket error during {context}: {source}")]
    WebSocket {
        context: &'static str,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("Serialization error during {context}: {source}")]
    Serialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("Deserialization error during {context}: {source}")]
    Deserialize {
        context: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[cfg(test)]
    #[error("Test expectation failed: {message}")]
    TestExpectation { message: &'static str },
    #[cfg(test)]
    #[error("Test expectation failed: {message}: {value}")]
    TestExpectationValue {
        message: &'static str,
        value: String,
    },
}
