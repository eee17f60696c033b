use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::CoordinatorError;
use crate::protocol::{IterationRange, ResultMessage};

use super::ledger::{BatchOutcome, IterationLedger, LedgerCounts, LedgerError};

/// Largest iteration count a single run accepts.
pub const MAX_RUN_TOTAL: u64 = 1_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Aborted,
}

impl RunStatus {
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Running)
    }
}

/// What an accepted result did to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultOutcome {
    pub batch: BatchOutcome,
    /// The report covered the whole assigned range.
    pub finished: bool,
    /// Unreported indices returned to the pool by a finishing report.
    pub returned: u64,
}

/// The single active run and its ledger.
#[derive(Debug)]
pub struct Run {
    id: String,
    status: RunStatus,
    ledger: IterationLedger,
    had_workers: bool,
    idle_since: Option<Instant>,
}

impl Run {
    /// Creates a pending run over `[0, total)`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` when `total` is zero or above
    /// [`MAX_RUN_TOTAL`]. The ledger keeps one slot per iteration, so the
    /// limit is checked before anything is allocated.
    pub fn new(id: String, total: u64) -> Result<Self, CoordinatorError> {
        validate_total(total)?;
        let slots = usize::try_from(total).map_err(|_err| CoordinatorError::InvalidArgument {
            name: "total",
            message: "is too large for this platform",
        })?;
        Ok(Self {
            id,
            status: RunStatus::Pending,
            ledger: IterationLedger::new(slots),
            had_workers: false,
            idle_since: None,
        })
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.status.is_active()
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, RunStatus::Running)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.ledger.total()
    }

    #[must_use]
    pub const fn counts(&self) -> LedgerCounts {
        self.ledger.counts()
    }

    #[must_use]
    pub const fn ledger(&self) -> &IterationLedger {
        &self.ledger
    }

    pub const fn start(&mut self) {
        if matches!(self.status, RunStatus::Pending) {
            self.status = RunStatus::Running;
        }
    }

    /// Moves an active run to `aborted`; returns false when already final.
    pub const fn abort(&mut self) -> bool {
        if !self.status.is_active() {
            return false;
        }
        self.status = RunStatus::Aborted;
        true
    }

    /// Marks the run completed once the ledger is settled.
    pub const fn check_completion(&mut self) -> bool {
        if self.is_running() && self.ledger.is_settled() {
            self.status = RunStatus::Completed;
            return true;
        }
        false
    }

    #[must_use]
    pub fn pool(&self) -> Vec<u64> {
        self.ledger.unassigned_pool()
    }

    /// Hands `range` to `worker`.
    ///
    /// # Errors
    ///
    /// Propagates the ledger error when any index is not unassigned.
    pub fn assign(&mut self, range: IterationRange, worker: &Arc<str>) -> Result<(), LedgerError> {
        self.had_workers = true;
        self.ledger.assign(range, worker)
    }

    pub fn release(&mut self, range: IterationRange, worker: &str) -> u64 {
        self.ledger.release(range, worker)
    }

    /// Validates and applies one `result` from `worker`.
    ///
    /// # Errors
    ///
    /// Rejects the whole report when the run id, reported range or any
    /// listed index is inconsistent with the worker's assignment.
    pub fn apply_result(
        &mut self,
        worker: &str,
        assigned: Option<IterationRange>,
        result: &ResultMessage,
    ) -> Result<ResultOutcome, LedgerError> {
        if result.run_id != self.id {
            return Err(LedgerError::RunMismatch {
                expected: self.id.clone(),
                actual: result.run_id.clone(),
            });
        }
        let Some(assigned) = assigned.filter(|_| self.is_running()) else {
            return Err(LedgerError::NotWorking {
                worker_id: worker.to_owned(),
            });
        };
        if !assigned.contains_range(result.range) {
            return Err(LedgerError::RangeOutsideAssignment {
                reported: result.range,
                assigned,
            });
        }
        if let Some(index) = result
            .completed_indices
            .iter()
            .chain(result.failed_indices.iter())
            .copied()
            .find(|index| !result.range.contains(*index))
        {
            return Err(LedgerError::IndexOutsideRange {
                index,
                range: result.range,
            });
        }

        let batch =
            self.ledger
                .apply_batch(worker, &result.completed_indices, &result.failed_indices)?;
        let finished = result.range == assigned;
        let returned = if finished {
            self.ledger.release(assigned, worker)
        } else {
            0
        };
        Ok(ResultOutcome {
            batch,
            finished,
            returned,
        })
    }

    /// Tracks how long the run has gone without any live worker.
    ///
    /// Returns true when the run had workers, lost all of them, and stayed
    /// empty for longer than `grace`.
    pub fn idle_expired(
        &mut self,
        live_workers: usize,
        now: Instant,
        grace: Option<Duration>,
    ) -> bool {
        if live_workers > 0 {
            self.had_workers = true;
            self.idle_since = None;
            return false;
        }
        if !self.had_workers || !self.is_active() {
            return false;
        }
        let since = *self.idle_since.get_or_insert(now);
        grace.is_some_and(|grace| now.saturating_duration_since(since) > grace)
    }
}

/// Checks a requested run size before any ledger is allocated.
pub(crate) const fn validate_total(total: u64) -> Result<(), CoordinatorError> {
    if total == 0 {
        return Err(CoordinatorError::InvalidArgument {
            name: "total",
            message: "must be greater than zero",
        });
    }
    if total > MAX_RUN_TOTAL {
        return Err(CoordinatorError::InvalidArgument {
            name: "total",
            message: "must not exceed 1000000 iterations",
        });
    }
    Ok(())
}
