mod app;
mod config;
mod coordinator;
mod validation;
mod worker;

#[cfg(test)]
mod test_support;

pub use app::{AppError, AppResult};
pub use config::ConfigError;
pub use coordinator::CoordinatorError;
pub use validation::ValidationError;
pub use worker::WorkerError;
