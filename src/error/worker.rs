use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Missing required option: {option}")]
    MissingOption { option: &'static str },
    #[error("Invalid coordinator URL '{url}': {source}")]
    InvalidConnectUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Coordinator URL '{url}' must use ws:// or wss://.")]
    UnsupportedScheme { url: String },
    #[error("Connection error to {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: Box<tungstenite::Error>,
    },
    #[error("Coordinator rejected worker: {message}")]
    Rejected { message: String },
    #[error("Coordinator connection closed.")]
    CoordinatorClosed,
    #[error("Unexpected {kind} message from coordinator.")]
    UnexpectedMessage { kind: &'static str },
    #[error("HTTP client error: {source}")]
    HttpClient {
        #[source]
        source: reqwest::Error,
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
