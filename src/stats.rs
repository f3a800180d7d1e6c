//! Lock-free counters for the relay's transient faults.
//!
//! Both adapters bump these from their own threads; nothing here allocates
//! or blocks, so the real-time callback can use it freely.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::stream::Direction;

/// A recoverable buffering fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Xrun {
    /// More was produced than the ring could take; the excess was dropped.
    Overflow,
    /// Less was queued than the consumer needed; silence was inserted.
    Underflow,
    /// The service reported a gap with no backing data.
    Hole,
}

#[derive(Default)]
struct Counters {
    overflows: AtomicU64,
    underflows: AtomicU64,
    holes: AtomicU64,
}

/// Shared fault counters, one set per [`Direction`].
#[derive(Default)]
pub struct RelayStats {
    directions: [Counters; 3],
    periods: AtomicU64,
    ring_swaps: AtomicU64,
}

impl RelayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record(&self, direction: Direction, xrun: Xrun) {
        let counters = &self.directions[direction.index()];
        let counter = match xrun {
            Xrun::Overflow => &counters.overflows,
            Xrun::Underflow => &counters.underflows,
            Xrun::Hole => &counters.holes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn period_processed(&self) {
        self.periods.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ring_swapped(&self) {
        self.ring_swaps.fetch_add(1, Ordering::Relaxed);
    }

    /// Current count of `xrun` events for `direction`.
    pub fn count(&self, direction: Direction, xrun: Xrun) -> u64 {
        let counters = &self.directions[direction.index()];
        match xrun {
            Xrun::Overflow => counters.overflows.load(Ordering::Relaxed),
            Xrun::Underflow => counters.underflows.load(Ordering::Relaxed),
            Xrun::Hole => counters.holes.load(Ordering::Relaxed),
        }
    }

    /// Copy every counter at once.
    pub fn snapshot(&self) -> StatsSnapshot {
        let direction = |d: Direction| DirectionStats {
            overflows: self.count(d, Xrun::Overflow),
            underflows: self.count(d, Xrun::Underflow),
            holes: self.count(d, Xrun::Hole),
        };
        StatsSnapshot {
            playback: direction(Direction::Playback),
            capture: direction(Direction::Capture),
            monitor: direction(Direction::Monitor),
            periods: self.periods.load(Ordering::Relaxed),
            ring_swaps: self.ring_swaps.load(Ordering::Relaxed),
        }
    }
}

/// Faults only the process callback counts.
const CALLBACK_XRUNS: [(Direction, Xrun); 3] = [
    (Direction::Playback, Xrun::Overflow),
    (Direction::Capture, Xrun::Underflow),
    (Direction::Monitor, Xrun::Underflow),
];

/// Tracks which callback faults have been logged.
///
/// The process callback must not log, so the service side picks up its
/// counters and reports what is new.
#[derive(Debug, Default)]
pub(crate) struct CallbackXruns {
    seen: [u64; 3],
}

impl CallbackXruns {
    /// Callback faults counted since the last call, skipping kinds with none.
    pub(crate) fn take_new(&mut self, stats: &RelayStats) -> Vec<(Direction, Xrun, u64)> {
        CALLBACK_XRUNS
            .iter()
            .zip(self.seen.iter_mut())
            .filter_map(|(&(direction, xrun), seen)| {
                let now = stats.count(direction, xrun);
                let new = now - *seen;
                *seen = now;
                (new > 0).then_some((direction, xrun, new))
            })
            .collect()
    }
}

/// Fault counts for one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectionStats {
    pub overflows: u64,
    pub underflows: u64,
    pub holes: u64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub playback: DirectionStats,
    pub capture: DirectionStats,
    pub monitor: DirectionStats,
    /// Fixed-period callbacks run so far.
    pub periods: u64,
    /// Ring sets installed by the callback after a period change.
    pub ring_swaps: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_per_direction() {
        let stats = RelayStats::new();
        stats.record(Direction::Capture, Xrun::Underflow);
        stats.record(Direction::Capture, Xrun::Underflow);
        stats.record(Direction::Monitor, Xrun::Hole);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.capture.underflows, 2);
        assert_eq!(snapshot.monitor.holes, 1);
        assert_eq!(snapshot.playback, DirectionStats::default());
    }

    #[test]
    fn callback_xruns_are_taken_once() {
        let stats = RelayStats::new();
        let mut log = CallbackXruns::default();
        stats.record(Direction::Playback, Xrun::Overflow);
        stats.record(Direction::Monitor, Xrun::Underflow);
        stats.record(Direction::Monitor, Xrun::Underflow);
        // counted by the service side, not ours to report
        stats.record(Direction::Capture, Xrun::Overflow);

        assert_eq!(
            log.take_new(&stats),
            vec![
                (Direction::Playback, Xrun::Overflow, 1),
                (Direction::Monitor, Xrun::Underflow, 2),
            ]
        );
        assert!(log.take_new(&stats).is_empty());

        stats.record(Direction::Capture, Xrun::Underflow);
        assert_eq!(log.take_new(&stats), vec![(Direction::Capture, Xrun::Underflow, 1)]);
    }
}
