//! Coordinator/worker wire protocol.
//!
//! Every WebSocket text frame carries exactly one JSON object tagged by a
//! `type` field. Unknown tags, missing fields and inverted ranges are
//! rejected at decode time so the coordinator never sees a half-valid
//! message.
mod io;
mod types;

pub use io::{MAX_MESSAGE_BYTES, decode_message, encode_message};
pub(crate) use io::{Frame, decode_frame};
pub use types::{
    AbortMessage, AssignMessage, ErrorMessage, HeartbeatMessage, IterationRange,
    ProgressMessage, RegisterMessage, ResultMessage, ShutdownMessage, WireMessage,
};
