use std::sync::Arc;

use thiserror::Error;

use crate::protocol::IterationRange;

/// Per-index state of the active run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationState {
    Unassigned,
    Assigned(Arc<str>),
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerCounts {
    pub unassigned: u64,
    pub assigned: u64,
    pub completed: u64,
    pub failed: u64,
}

impl LedgerCounts {
    #[must_use]
    pub const fn sum(&self) -> u64 {
        self.unassigned
            .saturating_add(self.assigned)
            .saturating_add(self.completed)
            .saturating_add(self.failed)
    }
}

/// Changes applied by one accepted result batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub completed: u64,
    pub failed: u64,
    /// Indices that were already terminal, i.e. a replayed report.
    pub skipped: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Result for run {actual} does not match active run {expected}.")]
    RunMismatch { expected: String, actual: String },
    #[error("Worker {worker_id} is not working on the active run.")]
    NotWorking { worker_id: String },
    #[error("Reported range {reported} lies outside assigned range {assigned}.")]
    RangeOutsideAssignment {
        reported: IterationRange,
        assigned: IterationRange,
    },
    #[error("Index {index} lies outside reported range {range}.")]
    IndexOutsideRange { index: u64, range: IterationRange },
    #[error("Index {index} was reported twice.")]
    DuplicateIndex { index: u64 },
    #[error("Index {index} is beyond the run total {total}.")]
    IndexOutOfBounds { index: u64, total: u64 },
    #[error("Index {index} is not assigned to worker {worker_id}.")]
    NotAssignedToWorker { index: u64, worker_id: String },
    #[error("Index {index} is already assigned.")]
    AlreadyAssigned { index: u64 },
}

/// Authoritative index → state table; counts are kept in step with entries.
#[derive(Debug, Clone)]
pub struct IterationLedger {
    entries: Vec<IterationState>,
    counts: LedgerCounts,
}

impl IterationLedger {
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            entries: vec![IterationState::Unassigned; total],
            counts: LedgerCounts {
                unassigned: u64::try_from(total).unwrap_or(u64::MAX),
                ..LedgerCounts::default()
            },
        }
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        u64::try_from(self.entries.len()).unwrap_or(u64::MAX)
    }

    #[must_use]
    pub const fn counts(&self) -> LedgerCounts {
        self.counts
    }

    #[must_use]
    pub fn state(&self, index: u64) -> Option<&IterationState> {
        usize::try_from(index)
            .ok()
            .and_then(|slot| self.entries.get(slot))
    }

    /// Ascending list of unassigned indices.
    #[must_use]
    pub fn unassigned_pool(&self) -> Vec<u64> {
        if self.counts.unassigned == 0 {
            return Vec::new();
        }
        self.entries
            .iter()
            .zip(0u64..)
            .filter(|(state, _)| matches!(state, IterationState::Unassigned))
            .map(|(_, index)| index)
            .collect()
    }

    /// Marks every index of `range` as owned by `worker`.
    ///
    /// # Errors
    ///
    /// Fails without touching the ledger when any index is out of bounds or
    /// not unassigned.
    pub fn assign(&mut self, range: IterationRange, worker: &Arc<str>) -> Result<(), LedgerError> {
        for index in range.indices() {
            match self.state(index) {
                Some(IterationState::Unassigned) => {}
                Some(_) => return Err(LedgerError::AlreadyAssigned { index }),
                None => {
                    return Err(LedgerError::IndexOutOfBounds {
                        index,
                        total: self.total(),
                    });
                }
            }
        }
        for index in range.indices() {
            self.set(index, IterationState::Assigned(Arc::clone(worker)));
        }
        Ok(())
    }

    /// Returns indices of `range` still owned by `worker` to the pool.
    pub fn release(&mut self, range: IterationRange, worker: &str) -> u64 {
        let mut released = 0u64;
        for index in range.indices() {
            let owned = matches!(
                self.state(index),
                Some(IterationState::Assigned(owner)) if owner.as_ref() == worker
            );
            if owned {
                self.set(index, IterationState::Unassigned);
                released = released.saturating_add(1);
            }
        }
        released
    }

    /// Applies one result batch atomically.
    ///
    /// Every index must be owned by `worker` or already terminal; terminal
    /// indices are skipped so a replayed batch changes nothing.
    ///
    /// # Errors
    ///
    /// Returns the first violation found; the ledger is left untouched.
    pub fn apply_batch(
        &mut self,
        worker: &str,
        completed: &[u64],
        failed: &[u64],
    ) -> Result<BatchOutcome, LedgerError> {
        let mut outcome = BatchOutcome::default();
        let mut pending: Vec<(u64, IterationState)> =
            Vec::with_capacity(completed.len().saturating_add(failed.len()));
        let mut seen = std::collections::HashSet::with_capacity(pending.capacity());

        let tagged = completed
            .iter()
            .map(|index| (*index, IterationState::Completed))
            .chain(failed.iter().map(|index| (*index, IterationState::Failed)));
        for (index, next) in tagged {
            if !seen.insert(index) {
                return Err(LedgerError::DuplicateIndex { index });
            }
            match self.state(index) {
                None => {
                    return Err(LedgerError::IndexOutOfBounds {
                        index,
                        total: self.total(),
                    });
                }
                Some(IterationState::Completed | IterationState::Failed) => {
                    outcome.skipped = outcome.skipped.saturating_add(1);
                }
                Some(IterationState::Assigned(owner)) if owner.as_ref() == worker => {
                    if matches!(next, IterationState::Completed) {
                        outcome.completed = outcome.completed.saturating_add(1);
                    } else {
                        outcome.failed = outcome.failed.saturating_add(1);
                    }
                    pending.push((index, next));
                }
                Some(IterationState::Unassigned | IterationState::Assigned(_)) => {
                    return Err(LedgerError::NotAssignedToWorker {
                        index,
                        worker_id: worker.to_owned(),
                    });
                }
            }
        }

        for (index, next) in pending {
            self.set(index, next);
        }
        Ok(outcome)
    }

    /// True once nothing is unassigned or assigned.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.counts.unassigned == 0 && self.counts.assigned == 0
    }

    fn set(&mut self, index: u64, next: IterationState) {
        let Some(slot) = usize::try_from(index)
            .ok()
            .and_then(|slot| self.entries.get_mut(slot))
        else {
            return;
        };
        let previous = std::mem::replace(slot, next);
        let counts = &mut self.counts;
        match previous {
            IterationState::Unassigned => counts.unassigned = counts.unassigned.saturating_sub(1),
            IterationState::Assigned(_) => counts.assigned = counts.assigned.saturating_sub(1),
            IterationState::Completed => counts.completed = counts.completed.saturating_sub(1),
            IterationState::Failed => counts.failed = counts.failed.saturating_sub(1),
        }
        match slot {
            IterationState::Unassigned => counts.unassigned = counts.unassigned.saturating_add(1),
            IterationState::Assigned(_) => counts.assigned = counts.assigned.saturating_add(1),
            IterationState::Completed => counts.completed = counts.completed.saturating_add(1),
            IterationState::Failed => counts.failed = counts.failed.saturating_add(1),
        }
    }
}
