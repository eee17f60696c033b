use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Inclusive, zero-based block of iteration indices (`end >= start`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct IterationRange {
    start: u64,
    end: u64,
}

#[derive(Deserialize)]
struct RawRange {
    start: u64,
    end: u64,
}

impl TryFrom<RawRange> for IterationRange {
    type Error = ValidationError;

    fn try_from(value: RawRange) -> Result<Self, Self::Error> {
        Self::new(value.start, value.end)
    }
}

impl IterationRange {
    /// Builds a range covering `start..=end`.
    ///
    /// # Errors
    ///
    /// Returns an error when `end < start`.
    pub const fn new(start: u64, end: u64) -> Result<Self, ValidationError> {
        if end < start {
            return Err(ValidationError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    #[must_use]
    pub const fn single(index: u64) -> Self {
        Self {
            start: index,
            end: index,
        }
    }

    #[must_use]
    pub const fn start(self) -> u64 {
        self.start
    }

    #[must_use]
    pub const fn end(self) -> u64 {
        self.end
    }

    /// Number of indices in the range, saturating at `u64::MAX`.
    #[must_use]
    pub const fn len(self) -> u64 {
        self.end.saturating_sub(self.start).saturating_add(1)
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        false
    }

    #[must_use]
    pub const fn contains(self, index: u64) -> bool {
        index >= self.start && index <= self.end
    }

    #[must_use]
    pub const fn contains_range(self, other: Self) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    #[must_use]
    pub const fn indices(self) -> RangeInclusive<u64> {
        self.start..=self.end
    }
}

impl fmt::Display for IterationRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    Register(RegisterMessage),
    Assign(AssignMessage),
    Progress(ProgressMessage),
    Result(ResultMessage),
    Abort(AbortMessage),
    Heartbeat(HeartbeatMessage),
    Shutdown(ShutdownMessage),
    Error(ErrorMessage),
}

impl WireMessage {
    /// Wire tag of the message, for logging.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Register(_) => "register",
            Self::Assign(_) => "assign",
            Self::Progress(_) => "progress",
            Self::Result(_) => "result",
            Self::Abort(_) => "abort",
            Self::Heartbeat(_) => "heartbeat",
            Self::Shutdown(_) => "shutdown",
            Self::Error(_) => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterMessage {
    pub id: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default, alias = "runtimeVersion")]
    pub runtime_version: String,
}

/// `range: None` tells an idle worker there is no work for it yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignMessage {
    pub run_id: String,
    pub range: Option<IterationRange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressMessage {
    pub run_id: String,
    pub completed_so_far: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub run_id: String,
    pub range: IterationRange,
    #[serde(default)]
    pub completed_indices: Vec<u64>,
    #[serde(default)]
    pub failed_indices: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortMessage {
    pub run_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatMessage {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownMessage {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub message: String,
}
