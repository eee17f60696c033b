use crate::error::AppError;
use crate::protocol::{AbortMessage, AssignMessage, ShutdownMessage};

pub(super) enum WorkerCommand {
    Assign(AssignMessage),
    Abort(AbortMessage),
    Shutdown(ShutdownMessage),
    Error(AppError),
    Disconnected(AppError),
}
