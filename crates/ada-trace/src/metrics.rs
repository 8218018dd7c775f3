//! Per-lane and per-thread counters plus rate derivation.
//!
//! Every counter is a relaxed atomic with a single writer (the owning thread
//! for producer-side counters, the drain for consumer-side ones); readers
//! accept slightly stale values. Snapshots are plain `u64` copies taken by
//! the drain at the configured interval.

use std::sync::atomic::{AtomicU64, Ordering};

/// Back-pressure counters of one lane. Lives in the lane's shared-memory
/// block, padded to whole cache lines.
#[repr(C, align(64))]
pub struct LaneCounters {
    /// Records accepted into a ring, net of records later sacrificed by the
    /// exhaustion reclaim. `events_written + events_dropped` equals the
    /// number of accepted invocations.
    pub events_written: AtomicU64,
    /// Records lost to back-pressure: sacrificed oldest-first during pool
    /// exhaustion, or rejected outright when even reclaim failed.
    pub events_dropped: AtomicU64,
    /// Records rejected after the shutdown gate closed, plus records left
    /// unread when the shutdown deadline expired.
    pub events_dropped_shutdown: AtomicU64,
    /// Payload bytes accepted into rings.
    pub bytes_written: AtomicU64,
    /// Writes that found the active ring full.
    pub ring_full_count: AtomicU64,
    /// Swap attempts that found no free ring.
    pub pool_exhaustion_count: AtomicU64,
    /// Records that did not fit their lane's slot width.
    pub allocation_failures: AtomicU64,
    /// High-water mark of the submit queue depth.
    pub max_queue_depth: AtomicU64,
    /// Completed swap-and-submit operations.
    pub ring_swaps: AtomicU64,
    /// Nanoseconds spent inside swap-and-submit.
    pub total_swap_duration_ns: AtomicU64,
    /// Detail records discarded by in-place recycling (unmarked windows).
    pub records_recycled: AtomicU64,
    _pad: [u8; 40],
}

const _: () = assert!(core::mem::size_of::<LaneCounters>() == 128);

impl LaneCounters {
    /// Zeroes all counters in place. Controller side, arena construction.
    pub(crate) fn reset(&self) {
        self.events_written.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.events_dropped_shutdown.store(0, Ordering::Relaxed);
        self.bytes_written.store(0, Ordering::Relaxed);
        self.ring_full_count.store(0, Ordering::Relaxed);
        self.pool_exhaustion_count.store(0, Ordering::Relaxed);
        self.allocation_failures.store(0, Ordering::Relaxed);
        self.max_queue_depth.store(0, Ordering::Relaxed);
        self.ring_swaps.store(0, Ordering::Relaxed);
        self.total_swap_duration_ns.store(0, Ordering::Relaxed);
        self.records_recycled.store(0, Ordering::Relaxed);
    }

    /// Raises the submit-queue high-water mark if `depth` exceeds it.
    /// Single-writer (the owning producer), so load-then-store suffices.
    #[inline]
    pub fn note_queue_depth(&self, depth: u64) {
        if depth > self.max_queue_depth.load(Ordering::Relaxed) {
            self.max_queue_depth.store(depth, Ordering::Relaxed);
        }
    }

    /// Copies the counters into a plain snapshot.
    pub fn snapshot(&self) -> LaneCountersSnapshot {
        LaneCountersSnapshot {
            events_written: self.events_written.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            events_dropped_shutdown: self.events_dropped_shutdown.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            ring_full_count: self.ring_full_count.load(Ordering::Relaxed),
            pool_exhaustion_count: self.pool_exhaustion_count.load(Ordering::Relaxed),
            allocation_failures: self.allocation_failures.load(Ordering::Relaxed),
            max_queue_depth: self.max_queue_depth.load(Ordering::Relaxed),
            ring_swaps: self.ring_swaps.load(Ordering::Relaxed),
            total_swap_duration_ns: self.total_swap_duration_ns.load(Ordering::Relaxed),
            records_recycled: self.records_recycled.load(Ordering::Relaxed),
        }
    }
}

/// Plain-u64 copy of [`LaneCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneCountersSnapshot {
    pub events_written: u64,
    pub events_dropped: u64,
    pub events_dropped_shutdown: u64,
    pub bytes_written: u64,
    pub ring_full_count: u64,
    pub pool_exhaustion_count: u64,
    pub allocation_failures: u64,
    pub max_queue_depth: u64,
    pub ring_swaps: u64,
    pub total_swap_duration_ns: u64,
    pub records_recycled: u64,
}

impl LaneCountersSnapshot {
    /// Field-wise sum, for aggregating lanes into a system view.
    pub fn accumulate(&mut self, other: &Self) {
        self.events_written += other.events_written;
        self.events_dropped += other.events_dropped;
        self.events_dropped_shutdown += other.events_dropped_shutdown;
        self.bytes_written += other.bytes_written;
        self.ring_full_count += other.ring_full_count;
        self.pool_exhaustion_count += other.pool_exhaustion_count;
        self.allocation_failures += other.allocation_failures;
        self.max_queue_depth = self.max_queue_depth.max(other.max_queue_depth);
        self.ring_swaps += other.ring_swaps;
        self.total_swap_duration_ns += other.total_swap_duration_ns;
        self.records_recycled += other.records_recycled;
    }
}

/// Thread-level counters kept in the registry slot.
#[repr(C)]
pub struct ThreadCounters {
    /// Handler invocations suppressed by the reentrancy guard.
    pub reentrancy_blocked: AtomicU64,
    /// Stack windows clamped out entirely (would-fault reads).
    pub stack_capture_failures: AtomicU64,
}

impl ThreadCounters {
    pub(crate) fn reset(&self) {
        self.reentrancy_blocked.store(0, Ordering::Relaxed);
        self.stack_capture_failures.store(0, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------
// RATE WINDOW
// ---------------------------------------------------------------------

/// One cumulative sample in the sliding window.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateSample {
    pub timestamp_ns: u64,
    pub events: u64,
    pub bytes: u64,
}

/// Bounded one-second sliding window of cumulative samples, from which
/// per-second rates are derived. Owned by the drain thread; no atomics.
#[derive(Debug)]
pub struct RateWindow {
    samples: [RateSample; Self::SLOTS],
    head: usize,
    len: usize,
}

impl RateWindow {
    const SLOTS: usize = 16;
    const SPAN_NS: u64 = 1_000_000_000;

    pub fn new() -> Self {
        Self {
            samples: [RateSample::default(); Self::SLOTS],
            head: 0,
            len: 0,
        }
    }

    /// Records a cumulative sample, evicting samples older than one second.
    pub fn push(&mut self, sample: RateSample) {
        self.samples[(self.head + self.len) % Self::SLOTS] = sample;
        if self.len < Self::SLOTS {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % Self::SLOTS;
        }
        while self.len > 1 {
            let oldest = self.samples[self.head];
            if sample.timestamp_ns.saturating_sub(oldest.timestamp_ns) <= Self::SPAN_NS {
                break;
            }
            self.head = (self.head + 1) % Self::SLOTS;
            self.len -= 1;
        }
    }

    fn span(&self) -> Option<(RateSample, RateSample, f64)> {
        if self.len < 2 {
            return None;
        }
        let oldest = self.samples[self.head];
        let newest = self.samples[(self.head + self.len - 1) % Self::SLOTS];
        let dt = newest.timestamp_ns.saturating_sub(oldest.timestamp_ns);
        if dt == 0 {
            return None;
        }
        Some((oldest, newest, dt as f64 / 1e9))
    }

    /// Events per second over the window, or 0.0 with fewer than two samples.
    pub fn events_per_second(&self) -> f64 {
        self.span()
            .map_or(0.0, |(old, new, secs)| (new.events - old.events) as f64 / secs)
    }

    /// Bytes per second over the window.
    pub fn bytes_per_second(&self) -> f64 {
        self.span()
            .map_or(0.0, |(old, new, secs)| (new.bytes - old.bytes) as f64 / secs)
    }
}

impl Default for RateWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_window_derives_rates() {
        let mut w = RateWindow::new();
        w.push(RateSample { timestamp_ns: 0, events: 0, bytes: 0 });
        w.push(RateSample {
            timestamp_ns: 500_000_000,
            events: 1000,
            bytes: 32_000,
        });
        assert!((w.events_per_second() - 2000.0).abs() < 1.0);
        assert!((w.bytes_per_second() - 64_000.0).abs() < 1.0);
    }

    #[test]
    fn rate_window_evicts_stale_samples() {
        let mut w = RateWindow::new();
        w.push(RateSample { timestamp_ns: 0, events: 0, bytes: 0 });
        w.push(RateSample {
            timestamp_ns: 100_000_000,
            events: 10,
            bytes: 10,
        });
        // Three seconds later: both earlier samples leave the window.
        w.push(RateSample {
            timestamp_ns: 3_000_000_000,
            events: 20,
            bytes: 20,
        });
        assert_eq!(w.events_per_second(), 0.0);
    }

    #[test]
    fn single_sample_has_no_rate() {
        let mut w = RateWindow::new();
        w.push(RateSample { timestamp_ns: 5, events: 5, bytes: 5 });
        assert_eq!(w.events_per_second(), 0.0);
    }
}
