//! Aggregated controller-side metrics.
//!
//! The drain thread snapshots every lane's counters at the configured
//! interval and publishes the aggregate here; readers clone the latest
//! snapshot. `events_captured` is derived from the writers (what actually
//! reached the files), reported next to the hot path's `events_written`;
//! the two differ exactly by records still in flight or dropped.

use ada_trace::LaneCountersSnapshot;
use serde::Serialize;

/// Serializable copy of one lane's counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LaneStats {
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

impl From<LaneCountersSnapshot> for LaneStats {
    fn from(s: LaneCountersSnapshot) -> Self {
        Self {
            events_written: s.events_written,
            events_dropped: s.events_dropped,
            events_dropped_shutdown: s.events_dropped_shutdown,
            bytes_written: s.bytes_written,
            ring_full_count: s.ring_full_count,
            pool_exhaustion_count: s.pool_exhaustion_count,
            allocation_failures: s.allocation_failures,
            max_queue_depth: s.max_queue_depth,
            ring_swaps: s.ring_swaps,
            total_swap_duration_ns: s.total_swap_duration_ns,
            records_recycled: s.records_recycled,
        }
    }
}

/// One thread's view in the aggregate snapshot.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ThreadMetricsSnapshot {
    pub thread_id: u32,
    pub slot_index: u32,
    pub active: bool,
    pub index: LaneStats,
    pub detail: LaneStats,
    pub reentrancy_blocked: u64,
    pub stack_capture_failures: u64,
    /// Index events that reached the file (canonical captured count).
    pub events_captured: u64,
    /// Detail records that reached the file.
    pub details_captured: u64,
    pub write_failures: u64,
    pub events_per_second: f64,
    pub bytes_per_second: f64,
}

/// System-wide totals over all threads.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SystemTotals {
    pub events_written: u64,
    pub events_dropped: u64,
    pub events_dropped_shutdown: u64,
    pub bytes_written: u64,
    pub events_captured: u64,
    pub details_captured: u64,
    pub write_failures: u64,
    pub pool_exhaustions: u64,
    pub ring_swaps: u64,
}

/// Aggregate published by the drain at each snapshot interval.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SystemMetricsSnapshot {
    pub timestamp_ns: u64,
    pub threads: Vec<ThreadMetricsSnapshot>,
    pub totals: SystemTotals,
}

impl SystemMetricsSnapshot {
    /// Recomputes `totals` from `threads`.
    pub fn recompute_totals(&mut self) {
        let mut totals = SystemTotals::default();
        for t in &self.threads {
            for lane in [&t.index, &t.detail] {
                totals.events_written += lane.events_written;
                totals.events_dropped += lane.events_dropped;
                totals.events_dropped_shutdown += lane.events_dropped_shutdown;
                totals.bytes_written += lane.bytes_written;
                totals.pool_exhaustions += lane.pool_exhaustion_count;
                totals.ring_swaps += lane.ring_swaps;
            }
            totals.events_captured += t.events_captured;
            totals.details_captured += t.details_captured;
            totals.write_failures += t.write_failures;
        }
        self.totals = totals;
    }
}

/// Final report returned by the drain thread at shutdown.
#[derive(Debug, Clone, Serialize)]
pub struct DrainSummary {
    /// All queues and rings were empty when the drain stopped.
    pub clean_shutdown: bool,
    /// Wall time of the shutdown phase.
    pub shutdown_duration_ms: u64,
    /// Final aggregate state.
    pub metrics: SystemMetricsSnapshot,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_sum_across_threads_and_lanes() {
        let mut snap = SystemMetricsSnapshot::default();
        snap.threads.push(ThreadMetricsSnapshot {
            thread_id: 1,
            index: LaneStats {
                events_written: 10,
                events_dropped: 2,
                bytes_written: 320,
                ..LaneStats::default()
            },
            detail: LaneStats {
                events_written: 3,
                bytes_written: 120,
                ..LaneStats::default()
            },
            events_captured: 10,
            details_captured: 1,
            ..ThreadMetricsSnapshot::default()
        });
        snap.threads.push(ThreadMetricsSnapshot {
            thread_id: 2,
            index: LaneStats {
                events_written: 5,
                ..LaneStats::default()
            },
            events_captured: 5,
            ..ThreadMetricsSnapshot::default()
        });

        snap.recompute_totals();
        assert_eq!(snap.totals.events_written, 18);
        assert_eq!(snap.totals.events_dropped, 2);
        assert_eq!(snap.totals.bytes_written, 440);
        assert_eq!(snap.totals.events_captured, 15);
        assert_eq!(snap.totals.details_captured, 1);
    }

    #[test]
    fn summary_serializes_to_json() {
        let summary = DrainSummary {
            clean_shutdown: true,
            shutdown_duration_ms: 12,
            metrics: SystemMetricsSnapshot::default(),
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"clean_shutdown\":true"));
    }
}
