//! Contiguous watermark over out-of-order range completions

use std::collections::BTreeMap;

use crate::coordinator::OffsetRange;
use crate::models::CheckpointData;

/// Workers finish ranges in any order. The tracker only moves `next_offset`
/// across an unbroken run of completed ranges, so a resumed run never skips
/// a window that was claimed but not persisted.
///
/// Completions above the watermark are kept as merged `start -> end` runs,
/// so a permanent hole costs one entry however many ranges finish past it.
#[derive(Debug)]
pub struct RangeTracker {
    stride: u64,
    next_offset: u64,
    completed: BTreeMap<u64, u64>,
    ranges_completed: u64,
}

impl RangeTracker {
    pub fn new(start: u64, stride: u64, ranges_completed: u64) -> Self {
        Self {
            stride: stride.max(1),
            next_offset: start,
            completed: BTreeMap::new(),
            ranges_completed,
        }
    }

    pub fn from_data(data: &CheckpointData) -> Self {
        Self::new(data.next_offset, data.stride, data.ranges_completed)
    }

    /// Record a persisted range and return the resulting resume data.
    /// Stale or repeated completions leave the counts untouched.
    pub fn complete(&mut self, range: OffsetRange) -> CheckpointData {
        let (mut start, mut end) = (range.offset, range.end());
        if end <= self.next_offset || self.covered(start, end) {
            return self.snapshot();
        }
        self.ranges_completed += 1;
        start = start.max(self.next_offset);

        if let Some((&prev_start, &prev_end)) = self.completed.range(..=start).next_back() {
            if prev_end >= start {
                self.completed.remove(&prev_start);
                start = prev_start;
                end = end.max(prev_end);
            }
        }
        while let Some((&next_start, &next_end)) = self.completed.range(start..).next() {
            if next_start > end {
                break;
            }
            self.completed.remove(&next_start);
            end = end.max(next_end);
        }

        if start <= self.next_offset {
            self.next_offset = end;
        } else {
            self.completed.insert(start, end);
        }
        self.snapshot()
    }

    fn covered(&self, start: u64, end: u64) -> bool {
        self.completed
            .range(..=start)
            .next_back()
            .is_some_and(|(_, &run_end)| run_end >= end)
    }

    pub fn snapshot(&self) -> CheckpointData {
        CheckpointData {
            stride: self.stride,
            next_offset: self.next_offset,
            ranges_completed: self.ranges_completed,
        }
    }

    /// Runs of completed ranges waiting on an earlier gap
    pub fn pending(&self) -> usize {
        self.completed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(offset: u64) -> OffsetRange {
        OffsetRange { offset, limit: 100 }
    }

    #[test]
    fn test_watermark_waits_for_gaps() {
        let mut tracker = RangeTracker::new(0, 100, 0);

        assert_eq!(tracker.complete(range(100)).next_offset, 0);
        assert_eq!(tracker.complete(range(300)).next_offset, 0);
        assert_eq!(tracker.pending(), 2);

        assert_eq!(tracker.complete(range(0)).next_offset, 200);
        let data = tracker.complete(range(200));
        assert_eq!(data.next_offset, 400);
        assert_eq!(data.ranges_completed, 4);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_resumed_tracker_keeps_counts() {
        let mut tracker = RangeTracker::from_data(&CheckpointData {
            stride: 50,
            next_offset: 500,
            ranges_completed: 10,
        });

        // Stale completions below the watermark are ignored
        assert_eq!(tracker.complete(OffsetRange { offset: 0, limit: 50 }).next_offset, 500);
        let data = tracker.complete(OffsetRange { offset: 500, limit: 50 });
        assert_eq!(data.next_offset, 550);
        assert_eq!(data.ranges_completed, 11);
    }

    #[test]
    fn test_permanent_hole_keeps_one_pending_run() {
        let mut tracker = RangeTracker::new(0, 100, 0);

        for offset in (100..1000).step_by(100) {
            tracker.complete(range(offset));
        }
        assert_eq!(tracker.pending(), 1);
        assert_eq!(tracker.snapshot().ranges_completed, 9);

        // Repeats are not counted again
        let data = tracker.complete(range(500));
        assert_eq!(data.ranges_completed, 9);
        assert_eq!(data.next_offset, 0);

        let data = tracker.complete(range(0));
        assert_eq!(data.next_offset, 1000);
        assert_eq!(data.ranges_completed, 10);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn test_runs_merge_across_filled_gaps() {
        let mut tracker = RangeTracker::new(0, 100, 0);

        tracker.complete(range(100));
        tracker.complete(range(300));
        assert_eq!(tracker.pending(), 2);

        tracker.complete(range(200));
        assert_eq!(tracker.pending(), 1);
        assert_eq!(tracker.snapshot().next_offset, 0);
    }
}
