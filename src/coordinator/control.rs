use serde::{Deserialize, Serialize};

use crate::error::{AppError, CoordinatorError};

#[derive(Debug, Deserialize)]
pub(super) struct StartRunRequest {
    pub(super) total: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ControlResponse {
    pub(super) status: &'static str,
    pub(super) run_id: String,
}

#[derive(Debug)]
pub(super) struct ControlError {
    pub(super) status: u16,
    pub(super) message: String,
}

impl ControlError {
    pub(super) fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<AppError> for ControlError {
    fn from(err: AppError) -> Self {
        let status = match err.as_coordinator() {
            Some(CoordinatorError::InvalidArgument { .. }) => 400,
            Some(CoordinatorError::UnknownRun { .. }) => 404,
            Some(CoordinatorError::RunInProgress { .. }) => 409,
            Some(CoordinatorError::NotRunning | CoordinatorError::ControlChannelClosed) => 503,
            Some(CoordinatorError::ResponseTimeout) => 504,
            Some(_) | None => 500,
        };
        Self::new(status, err.to_string())
    }
}
