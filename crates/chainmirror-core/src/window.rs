//! Block-range windowing for the backfill scan.

use std::ops::RangeInclusive;

/// Blocks covered by one `eth_getLogs` query.
pub const WINDOW_SIZE: u64 = 10_000;

/// Overlap re-scanned at the start of a resumed pass.
pub const MARGIN_BLOCKS: u64 = 50;

/// One inclusive block window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRange {
    pub start: u64,
    pub end: u64,
}

impl WindowRange {
    /// Number of blocks in the window.
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn as_range(&self) -> RangeInclusive<u64> {
        self.start..=self.end
    }
}

/// Yields windows `[start, min(start + size - 1, head)]` for
/// `start = scan_start, scan_start + size, …` while `start < head`.
///
/// An empty scan (`scan_start >= head`) yields nothing.
#[derive(Debug, Clone)]
pub struct WindowIter {
    next_start: u64,
    head: u64,
    size: u64,
}

impl WindowIter {
    /// # Panics
    ///
    /// Panics if `size` is 0.
    pub fn new(scan_start: u64, head: u64, size: u64) -> Self {
        assert!(size >= 1, "window size must be at least 1");
        Self {
            next_start: scan_start,
            head,
            size,
        }
    }

    /// Number of windows left to yield.
    pub fn remaining(&self) -> u64 {
        if self.next_start >= self.head {
            0
        } else {
            (self.head - self.next_start).div_ceil(self.size)
        }
    }
}

impl Iterator for WindowIter {
    type Item = WindowRange;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_start >= self.head {
            return None;
        }
        let start = self.next_start;
        let end = start.saturating_add(self.size - 1).min(self.head);
        self.next_start = start.saturating_add(self.size);
        Some(WindowRange { start, end })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (n, Some(n))
    }
}

/// Compute where a pass begins: the deploy block on a first run, else the
/// cursor minus the margin.
pub fn scan_start(last_synced: Option<u64>, deploy_block: Option<u64>) -> u64 {
    match last_synced {
        Some(block) => block.saturating_sub(MARGIN_BLOCKS),
        None => deploy_block.unwrap_or(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn three_window_scenario() {
        let windows: Vec<_> = WindowIter::new(100, 25_000, WINDOW_SIZE).collect();
        assert_eq!(
            windows,
            vec![
                WindowRange { start: 100, end: 10_099 },
                WindowRange { start: 10_100, end: 20_099 },
                WindowRange { start: 20_100, end: 25_000 },
            ]
        );
    }

    #[test]
    fn empty_scan_yields_nothing() {
        assert_eq!(WindowIter::new(500, 500, WINDOW_SIZE).count(), 0);
        assert_eq!(WindowIter::new(600, 500, WINDOW_SIZE).count(), 0);
    }

    #[test]
    fn windows_partition_without_gaps() {
        for (start, head, size) in [(0u64, 1u64, 1u64), (7, 99, 10), (1, 30_001, 10_000), (5, 6, 3)] {
            let windows: Vec<_> = WindowIter::new(start, head, size).collect();
            assert_eq!(windows.first().unwrap().start, start);
            for pair in windows.windows(2) {
                assert_eq!(pair[1].start, pair[0].end + 1, "contiguous, non-overlapping");
            }
            assert!(windows.iter().all(|w| w.block_count() <= size));
            for block in start..head {
                let hits = windows.iter().filter(|w| w.as_range().contains(&block)).count();
                assert_eq!(hits, 1, "block {block} covered exactly once");
            }
        }
    }

    #[test]
    fn remaining_matches_count() {
        let iter = WindowIter::new(100, 25_000, WINDOW_SIZE);
        assert_eq!(iter.remaining(), 3);
        assert_eq!(iter.size_hint(), (3, Some(3)));
    }

    #[test]
    fn first_run_has_no_margin() {
        assert_eq!(scan_start(None, Some(5_000)), 5_000);
    }

    #[test]
    fn resumed_run_applies_margin() {
        assert_eq!(scan_start(Some(5_000), Some(100)), 4_950);
        assert_eq!(scan_start(Some(20), None), 0);
    }
}
