use thiserror::Error;

use super::{ConfigError, CoordinatorError, ValidationError, WorkerError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("TOML error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Coordinator error: {0}")]
    Coordinator(#[from] CoordinatorError),
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn coordinator<E>(error: E) -> Self
    where
        E: Into<CoordinatorError>,
    {
        error.into().into()
    }

    pub fn worker<E>(error: E) -> Self
    where
        E: Into<WorkerError>,
    {
        error.into().into()
    }

    /// Returns the coordinator error carried by this value, if any.
    #[must_use]
    pub const fn as_coordinator(&self) -> Option<&CoordinatorError> {
        match self {
            Self::Coordinator(err) => Some(err),
            Self::Io { .. }
            | Self::Clap { .. }
            | Self::Json { .. }
            | Self::Toml { .. }
            | Self::Join { .. }
            | Self::Validation(_)
            | Self::Config(_)
            | Self::Worker(_) => None,
        }
    }
}
