//! Offset coordinator for parallel pagination
//!
//! Hands out fixed-width, non-overlapping offset windows to workers and
//! counts workers that have reached the end of the listing. All state sits
//! behind one lock; the critical section is pure arithmetic.

use std::sync::{Mutex, PoisonError};

/// A claimed pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OffsetRange {
    pub offset: u64,
    pub limit: u64,
}

impl OffsetRange {
    pub fn end(&self) -> u64 {
        self.offset + self.limit
    }
}

#[derive(Debug)]
struct CoordinatorState {
    next_offset: u64,
    workers_done: usize,
    total_workers: usize,
}

/// Shared cursor over an offset-paginated listing
#[derive(Debug)]
pub struct OffsetCoordinator {
    stride: u64,
    state: Mutex<CoordinatorState>,
}

impl OffsetCoordinator {
    pub fn new(stride: u64) -> Self {
        Self::starting_at(0, stride)
    }

    /// Coordinator whose first claim begins at `offset`, used when resuming
    pub fn starting_at(offset: u64, stride: u64) -> Self {
        Self {
            stride: stride.max(1),
            state: Mutex::new(CoordinatorState {
                next_offset: offset,
                workers_done: 0,
                total_workers: 0,
            }),
        }
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn set_total_workers(&self, total: usize) {
        self.lock().total_workers = total;
    }

    /// Claim the next unclaimed window and advance the cursor
    pub fn claim_range(&self) -> OffsetRange {
        let mut state = self.lock();
        let range = OffsetRange {
            offset: state.next_offset,
            limit: self.stride,
        };
        state.next_offset += self.stride;
        range
    }

    pub fn mark_worker_complete(&self) {
        self.lock().workers_done += 1;
    }

    pub fn all_workers_done(&self) -> bool {
        let state = self.lock();
        state.workers_done >= state.total_workers
    }

    pub fn workers_done(&self) -> usize {
        self.lock().workers_done
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CoordinatorState> {
        // State is plain counters; a panic elsewhere cannot leave it torn
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
