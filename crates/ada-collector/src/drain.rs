//! The drain loop.
//!
//! A single thread round-robins over live registry slots, index lane before
//! detail lane, popping submitted rings and feeding their contents to the
//! per-thread writers. Fairness comes from the per-thread ring quantum;
//! responsiveness from the adaptive idle backoff parked on the wake pipe.
//!
//! On shutdown the loop turns into the final drain: the registration and
//! event gates close, then iterations also empty the active rings (the
//! producers have stopped, and ring reads are the drain's role anyway) until
//! nothing is pending or the deadline expires. Whatever the deadline leaves
//! behind is counted as shutdown drops and the files are finalized
//! regardless.

use crate::metrics::{SystemMetricsSnapshot, ThreadMetricsSnapshot, DrainSummary};
use crate::wake::WakeReceiver;
use crate::writer::ThreadTraceWriter;
use ada_trace::{
    monotonic_ns, Fabric, IdleBackoff, LaneKind, LanePool, RateSample, RateWindow, RingView,
    DETAIL_HEADER_SIZE,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Drain tuning knobs.
#[derive(Debug, Clone, Copy)]
pub struct DrainConfig {
    /// Events read from a ring per batch.
    pub batch_size: usize,
    /// Rings drained per lane per iteration (fairness quantum).
    pub ring_quantum: u32,
    /// Aggregate metrics snapshot interval.
    pub snapshot_interval_ms: u64,
    /// Soft deadline for the final drain.
    pub shutdown_deadline_ms: u64,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            batch_size: 256,
            ring_quantum: 4,
            snapshot_interval_ms: 100,
            shutdown_deadline_ms: 100,
        }
    }
}

/// The drain thread's state. Constructed by the session, consumed by `run`.
pub struct DrainScheduler {
    fabric: Arc<Fabric>,
    config: DrainConfig,
    session_dir: PathBuf,
    writers: Vec<Option<ThreadTraceWriter>>,
    rate_windows: Vec<RateWindow>,
    wake: WakeReceiver,
    shutdown_requested: Arc<AtomicBool>,
    metrics: Arc<Mutex<SystemMetricsSnapshot>>,
    scratch: Vec<u8>,
    last_snapshot_ns: u64,
}

impl DrainScheduler {
    pub(crate) fn new(
        fabric: Arc<Fabric>,
        config: DrainConfig,
        session_dir: PathBuf,
        wake: WakeReceiver,
        shutdown_requested: Arc<AtomicBool>,
        metrics: Arc<Mutex<SystemMetricsSnapshot>>,
    ) -> Self {
        let max_threads = fabric.config().max_threads as usize;
        let mut writers = Vec::with_capacity(max_threads);
        writers.resize_with(max_threads, || None);
        let mut rate_windows = Vec::with_capacity(max_threads);
        rate_windows.resize_with(max_threads, RateWindow::new);
        Self {
            fabric,
            config,
            session_dir,
            writers,
            rate_windows,
            wake,
            shutdown_requested,
            metrics,
            scratch: Vec::new(),
            last_snapshot_ns: 0,
        }
    }

    /// Runs until shutdown is requested, then performs the final drain and
    /// finalizes every file. Returns the summary report.
    pub fn run(mut self) -> DrainSummary {
        let mut backoff = IdleBackoff::new();
        while !self.shutdown_requested.load(Ordering::Acquire) {
            let drained = self.iteration(false);
            self.maybe_snapshot();
            if drained == 0 {
                if let Some(sleep) = backoff.idle() {
                    self.wake.wait(sleep);
                }
            } else {
                backoff.reset();
            }
        }
        self.shutdown_phase()
    }

    /// One pass over every live slot. With `include_active` the active rings
    /// are emptied too (final drain only).
    fn iteration(&mut self, include_active: bool) -> u64 {
        let fabric = Arc::clone(&self.fabric);
        let registry = fabric.registry();
        let mut total = 0;

        for slot in 0..registry.thread_count() {
            let slot_ref = registry.slot(slot);
            if !slot_ref.is_ready() {
                continue;
            }
            if self.writers[slot as usize].is_none() {
                match ThreadTraceWriter::create(&self.session_dir, slot_ref.thread_id()) {
                    Ok(writer) => self.writers[slot as usize] = Some(writer),
                    Err(err) => {
                        tracing::error!(
                            thread_id = slot_ref.thread_id(),
                            error = %err,
                            "cannot create trace writer, skipping thread"
                        );
                        continue;
                    }
                }
            }
            let lanes = fabric.lanes(slot);
            let Some(writer) = self.writers[slot as usize].as_mut() else {
                continue;
            };
            for kind in [LaneKind::Index, LaneKind::Detail] {
                total += drain_lane(
                    &lanes.pool(kind),
                    kind,
                    writer,
                    &mut self.scratch,
                    self.config.batch_size,
                    self.config.ring_quantum,
                    include_active,
                );
            }
        }
        total
    }

    fn maybe_snapshot(&mut self) {
        let now = monotonic_ns();
        let interval_ns = self.config.snapshot_interval_ms * 1_000_000;
        if now.saturating_sub(self.last_snapshot_ns) < interval_ns {
            return;
        }
        self.last_snapshot_ns = now;
        let snap = self.build_snapshot(now);
        *self.metrics.lock().expect("metrics lock") = snap;
    }

    fn build_snapshot(&mut self, now: u64) -> SystemMetricsSnapshot {
        let fabric = Arc::clone(&self.fabric);
        let registry = fabric.registry();
        let mut snap = SystemMetricsSnapshot {
            timestamp_ns: now,
            ..SystemMetricsSnapshot::default()
        };

        for slot in 0..registry.thread_count() {
            let slot_ref = registry.slot(slot);
            if !slot_ref.is_ready() {
                continue;
            }
            let lanes = fabric.lanes(slot);
            let index = lanes.index_pool().counters().snapshot();
            let detail = lanes.detail_pool().counters().snapshot();

            let window = &mut self.rate_windows[slot as usize];
            window.push(RateSample {
                timestamp_ns: now,
                events: index.events_written + detail.events_written,
                bytes: index.bytes_written + detail.bytes_written,
            });

            let (events_captured, details_captured, write_failures) =
                match &self.writers[slot as usize] {
                    Some(w) => (
                        u64::from(w.index_event_count()),
                        u64::from(w.detail_event_count()),
                        w.write_failures(),
                    ),
                    None => (0, 0, 0),
                };

            snap.threads.push(ThreadMetricsSnapshot {
                thread_id: slot_ref.thread_id(),
                slot_index: slot,
                active: slot_ref.is_active(),
                index: index.into(),
                detail: detail.into(),
                reentrancy_blocked: slot_ref.counters.reentrancy_blocked.load(Ordering::Relaxed),
                stack_capture_failures: slot_ref
                    .counters
                    .stack_capture_failures
                    .load(Ordering::Relaxed),
                events_captured,
                details_captured,
                write_failures,
                events_per_second: window.events_per_second(),
                bytes_per_second: window.bytes_per_second(),
            });
        }
        snap.recompute_totals();
        snap
    }

    // ---------------------------------------------------------------------
    // SHUTDOWN
    // ---------------------------------------------------------------------

    fn shutdown_phase(mut self) -> DrainSummary {
        let start = Instant::now();
        {
            let registry = self.fabric.registry();
            registry.set_accepting_registrations(false);
            registry.request_shutdown();
            for slot in 0..registry.thread_count() {
                let slot_ref = registry.slot(slot);
                if slot_ref.is_ready() {
                    slot_ref.set_accepting_events(false);
                }
            }
        }

        let deadline = start + Duration::from_millis(self.config.shutdown_deadline_ms);
        let mut clean = true;
        loop {
            let drained = self.iteration(true);
            if drained == 0 && !self.has_pending() {
                break;
            }
            if Instant::now() >= deadline {
                clean = false;
                self.count_remainder();
                break;
            }
        }

        for writer in self.writers.iter_mut().flatten() {
            if let Err(err) = writer.finalize() {
                tracing::error!(thread_id = writer.thread_id(), error = %err, "finalize failed");
            }
        }

        let metrics = self.build_snapshot(monotonic_ns());
        *self.metrics.lock().expect("metrics lock") = metrics.clone();

        let duration = start.elapsed();
        tracing::info!(
            clean_shutdown = clean,
            duration_ms = duration.as_millis() as u64,
            events_captured = metrics.totals.events_captured,
            events_dropped = metrics.totals.events_dropped,
            "drain stopped"
        );
        DrainSummary {
            clean_shutdown: clean,
            shutdown_duration_ms: duration.as_millis() as u64,
            metrics,
        }
    }

    /// Anything left in a submit queue or a persistable active ring?
    fn has_pending(&self) -> bool {
        let registry = self.fabric.registry();
        for slot in 0..registry.thread_count() {
            if !registry.slot(slot).is_ready() {
                continue;
            }
            let lanes = self.fabric.lanes(slot);
            for kind in [LaneKind::Index, LaneKind::Detail] {
                let pool = lanes.pool(kind);
                if !pool.submit_queue().is_empty() {
                    return true;
                }
                let persist_active = kind == LaneKind::Index || pool.marked_event_seen();
                if persist_active && !pool.ring(pool.active_index()).is_empty() {
                    return true;
                }
            }
        }
        false
    }

    /// Deadline expired: everything still unread becomes a shutdown drop.
    fn count_remainder(&self) {
        let registry = self.fabric.registry();
        for slot in 0..registry.thread_count() {
            if !registry.slot(slot).is_ready() {
                continue;
            }
            let lanes = self.fabric.lanes(slot);
            for kind in [LaneKind::Index, LaneKind::Detail] {
                let pool = lanes.pool(kind);
                let mut remainder = 0u64;
                while let Some(idx) = pool.take_submitted() {
                    remainder += u64::from(pool.ring(idx).discard_all());
                    pool.return_ring(idx);
                }
                remainder += u64::from(pool.ring(pool.active_index()).discard_all());
                if remainder > 0 {
                    pool.counters()
                        .events_dropped_shutdown
                        .fetch_add(remainder, Ordering::Relaxed);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------
// LANE / RING DRAIN HELPERS
// ---------------------------------------------------------------------

fn drain_lane(
    pool: &LanePool<'_>,
    kind: LaneKind,
    writer: &mut ThreadTraceWriter,
    scratch: &mut Vec<u8>,
    batch_size: usize,
    quantum: u32,
    include_active: bool,
) -> u64 {
    let event_size = pool.event_size() as usize;
    scratch.resize(batch_size * event_size, 0);

    let mut total = 0;
    let mut rings = 0;
    while rings < quantum {
        let Some(idx) = pool.take_submitted() else { break };
        total += drain_ring(&pool.ring(idx), kind, writer, scratch, batch_size);
        pool.return_ring(idx);
        rings += 1;
    }

    if include_active {
        // Final drain: the producers have stopped, so the never-submitted
        // active ring is read in place. An unmarked detail window is left to
        // die with the session rather than persisted.
        let persist = kind == LaneKind::Index || pool.marked_event_seen();
        if persist {
            total += drain_ring(
                &pool.ring(pool.active_index()),
                kind,
                writer,
                scratch,
                batch_size,
            );
            if kind == LaneKind::Detail {
                pool.clear_marked();
            }
        }
    }
    total
}

fn drain_ring(
    ring: &RingView<'_>,
    kind: LaneKind,
    writer: &mut ThreadTraceWriter,
    scratch: &mut [u8],
    batch_size: usize,
) -> u64 {
    let event_size = ring.event_size() as usize;
    let mut total = 0u64;
    loop {
        let n = ring.read_batch(scratch, batch_size);
        if n == 0 {
            break;
        }
        match kind {
            LaneKind::Index => writer.append_index(&scratch[..n * event_size]),
            LaneKind::Detail => {
                for i in 0..n {
                    let slot = &scratch[i * event_size..(i + 1) * event_size];
                    let record_len =
                        u32::from_le_bytes(slot[0..4].try_into().unwrap()) as usize;
                    if !(DETAIL_HEADER_SIZE..=event_size).contains(&record_len) {
                        tracing::warn!(record_len, "skipping malformed detail record");
                        continue;
                    }
                    writer.append_detail(&slot[..record_len]);
                }
            }
        }
        total += n as u64;
    }
    total
}
