//! Per-lane ring pool: K rings, one active, swap-and-submit.
//!
//! A lane owns K rings plus two SPSC index queues. Exactly one ring is
//! active for writes at any time. When a write finds the active ring full,
//! the producer swaps: pop a spare ring index from the free queue, exchange
//! it into `active_idx`, push the full ring's index into the submit queue.
//! The drain pops submitted rings, empties them, and pushes their indices
//! back into the free queue.
//!
//! The detail lane adds selective persistence on top: a full detail ring is
//! only submitted if `marked_event_seen` is set; otherwise it is recycled in
//! place (contents discarded, flag left clear), so detail data keeps
//! being overwritten until a marked window elects a ring for persistence.
//! Whatever already sat in the ring when the mark arrived rides along as the
//! pre-roll.
//!
//! ## Exhaustion
//!
//! If the submit queue is full or the free queue is empty, the pool is
//! exhausted: the producer reclaims one slot in its own active ring with
//! `drop_oldest` (legal: a never-submitted ring has both ends owned by the
//! producer) and the oldest record is sacrificed. If even that fails and
//! K > 1, the producer soft-rotates `active_idx` forward as a last resort.
//! Exhaustion is always counted before a soft rotate can happen.

use crate::clock::monotonic_ns;
use crate::invariants::debug_assert_ring_conservation;
use crate::metrics::LaneCounters;
use crate::queue::{bytes_for_queue, queue_capacity_for, QueueView};
use crate::ring::{bytes_for_ring, RingView};
use std::sync::atomic::{AtomicU32, Ordering};

/// Which stream a lane carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum LaneKind {
    /// Always-persisted fixed-width index records.
    Index = 0,
    /// Selectively-persisted detail records (pre-roll capture).
    Detail = 1,
}

/// Immutable geometry of one lane, derived from the fabric configuration.
#[derive(Debug, Clone, Copy)]
pub struct LaneGeometry {
    pub kind: LaneKind,
    pub ring_count: u32,
    pub ring_capacity: u32,
    pub event_size: u32,
}

impl LaneGeometry {
    #[inline]
    pub fn queue_capacity(&self) -> u32 {
        queue_capacity_for(self.ring_count)
    }
}

/// In-memory header of one lane block.
#[repr(C, align(64))]
pub struct LaneHdr {
    // line 0: immutable geometry
    kind: u32,
    ring_count: u32,
    ring_capacity: u32,
    event_size: u32,
    queue_capacity: u32,
    _pad0: [u8; 44],
    // line 1: producer-owned flags
    active_idx: AtomicU32,
    marked_event_seen: AtomicU32,
    _pad1: [u8; 56],
}

const LANE_HDR_SIZE: usize = 128;
const _: () = assert!(core::mem::size_of::<LaneHdr>() == LANE_HDR_SIZE);

/// Total bytes of one lane block: header, counters, two queues, K rings.
pub fn bytes_for_lane(geom: &LaneGeometry) -> usize {
    let qbytes = bytes_for_queue(geom.queue_capacity());
    LANE_HDR_SIZE
        + core::mem::size_of::<LaneCounters>()
        + 2 * qbytes
        + geom.ring_count as usize * bytes_for_ring(geom.ring_capacity, geom.event_size)
}

/// Outcome of a hot-path record write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The record landed in a ring.
    Written,
    /// The record was sacrificed to back-pressure.
    Dropped,
}

/// View over one lane block; see [`RingView`](crate::ring::RingView) for the
/// create/attach split and the per-call materialization rule.
pub struct LanePool<'a> {
    hdr: &'a LaneHdr,
    counters: &'a LaneCounters,
    base: *mut u8,
}

impl<'a> LanePool<'a> {
    /// Initializes a lane block: active ring 0, free queue `{1..K-1}`,
    /// submit queue empty, all rings created, counters zeroed.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `bytes_for_lane(geom)` writable bytes,
    /// 64-byte aligned, not concurrently accessed.
    pub unsafe fn create(base: *mut u8, geom: &LaneGeometry) -> Self {
        let hdr = &mut *base.cast::<LaneHdr>();
        hdr.kind = geom.kind as u32;
        hdr.ring_count = geom.ring_count;
        hdr.ring_capacity = geom.ring_capacity;
        hdr.event_size = geom.event_size;
        hdr.queue_capacity = geom.queue_capacity();
        hdr.active_idx = AtomicU32::new(0);
        hdr.marked_event_seen = AtomicU32::new(0);

        let pool = Self::attach(base);
        pool.counters.reset();

        let submit = QueueView::create(pool.queue_base(0), geom.queue_capacity());
        let free = QueueView::create(pool.queue_base(1), geom.queue_capacity());
        for i in 0..geom.ring_count {
            RingView::create(pool.ring_base(i), geom.ring_capacity, geom.event_size);
            if i > 0 {
                let ok = free.push(i);
                debug_assert!(ok);
            }
        }
        debug_assert_ring_conservation!(
            submit.len() as usize,
            free.len() as usize,
            geom.ring_count
        );
        pool
    }

    /// Attaches to an already-initialized lane block.
    ///
    /// # Safety
    ///
    /// `base` must point to a block previously initialized by `create` and
    /// mapped for its full size.
    #[inline]
    pub unsafe fn attach(base: *mut u8) -> Self {
        let hdr = &*base.cast::<LaneHdr>();
        let counters = &*base.add(LANE_HDR_SIZE).cast::<LaneCounters>();
        Self { hdr, counters, base }
    }

    // ---------------------------------------------------------------------
    // LAYOUT
    // ---------------------------------------------------------------------

    #[inline]
    fn queue_bytes(&self) -> usize {
        bytes_for_queue(self.hdr.queue_capacity)
    }

    #[inline]
    fn queue_base(&self, which: usize) -> *mut u8 {
        // SAFETY: offsets stay inside the lane block by construction.
        unsafe {
            self.base.add(
                LANE_HDR_SIZE + core::mem::size_of::<LaneCounters>() + which * self.queue_bytes(),
            )
        }
    }

    #[inline]
    fn ring_base(&self, idx: u32) -> *mut u8 {
        debug_assert!(idx < self.hdr.ring_count);
        let ring_bytes = bytes_for_ring(self.hdr.ring_capacity, self.hdr.event_size);
        // SAFETY: offsets stay inside the lane block by construction.
        unsafe { self.queue_base(2).add(idx as usize * ring_bytes) }
    }

    /// Materializes a view of ring `idx`.
    #[inline]
    pub fn ring(&self, idx: u32) -> RingView<'a> {
        // SAFETY: the block was initialized by `create`; `ring_base` bounds
        // the index.
        unsafe { RingView::attach(self.ring_base(idx)) }
    }

    /// Submit queue: producer = owning thread, consumer = drain.
    #[inline]
    pub fn submit_queue(&self) -> QueueView<'a> {
        // SAFETY: initialized by `create`.
        unsafe { QueueView::attach(self.queue_base(0)) }
    }

    /// Free queue: producer = drain, consumer = owning thread.
    #[inline]
    pub fn free_queue(&self) -> QueueView<'a> {
        // SAFETY: initialized by `create`.
        unsafe { QueueView::attach(self.queue_base(1)) }
    }

    // ---------------------------------------------------------------------
    // STATE
    // ---------------------------------------------------------------------

    #[inline]
    pub fn kind(&self) -> LaneKind {
        if self.hdr.kind == LaneKind::Detail as u32 {
            LaneKind::Detail
        } else {
            LaneKind::Index
        }
    }

    #[inline]
    pub fn ring_count(&self) -> u32 {
        self.hdr.ring_count
    }

    #[inline]
    pub fn event_size(&self) -> u32 {
        self.hdr.event_size
    }

    /// Index of the ring currently receiving writes.
    #[inline]
    pub fn active_index(&self) -> u32 {
        self.hdr.active_idx.load(Ordering::Acquire)
    }

    /// Back-pressure counters of this lane.
    #[inline]
    pub fn counters(&self) -> &'a LaneCounters {
        self.counters
    }

    /// Detail lanes only: a trigger pattern matched since the last
    /// submission, so the current window must be persisted.
    #[inline]
    pub fn marked_event_seen(&self) -> bool {
        self.hdr.marked_event_seen.load(Ordering::Relaxed) != 0
    }

    /// Flags the current detail window for persistence.
    #[inline]
    pub fn set_marked(&self) {
        self.hdr.marked_event_seen.store(1, Ordering::Relaxed);
    }

    /// Clears the persistence flag (after a successful submission).
    #[inline]
    pub fn clear_marked(&self) {
        self.hdr.marked_event_seen.store(0, Ordering::Relaxed);
    }

    // ---------------------------------------------------------------------
    // PRODUCER PROTOCOL (owning thread only)
    // ---------------------------------------------------------------------

    /// Writes one record, swapping rings when the active one fills.
    ///
    /// Never blocks and never fails with an error: back-pressure turns into
    /// counted drops. Must only be called from the lane's owning thread.
    pub fn write_record(&self, record: &[u8]) -> WriteOutcome {
        if record.len() > self.hdr.event_size as usize {
            self.counters.allocation_failures.fetch_add(1, Ordering::Relaxed);
            return WriteOutcome::Dropped;
        }

        let active = self.hdr.active_idx.load(Ordering::Relaxed);
        if self.ring(active).write(record) {
            self.note_written(record.len());
            return WriteOutcome::Written;
        }

        self.counters.ring_full_count.fetch_add(1, Ordering::Relaxed);
        self.rotate_full_ring(active);

        // Retry once on whatever ring is active now.
        let active = self.hdr.active_idx.load(Ordering::Relaxed);
        if self.ring(active).write(record) {
            self.note_written(record.len());
            WriteOutcome::Written
        } else {
            self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            WriteOutcome::Dropped
        }
    }

    #[inline]
    fn note_written(&self, len: usize) {
        self.counters.events_written.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_written.fetch_add(len as u64, Ordering::Relaxed);
    }

    /// Handles a full active ring: recycle (unmarked detail) or
    /// swap-and-submit, falling back to the exhaustion path.
    fn rotate_full_ring(&self, active: u32) {
        if self.kind() == LaneKind::Detail && !self.marked_event_seen() {
            // Unmarked window: discard in place. The ring has never been
            // submitted, so the producer owns both ends of it.
            let recycled = self.ring(active).discard_all();
            self.counters
                .records_recycled
                .fetch_add(u64::from(recycled), Ordering::Relaxed);
            return;
        }
        self.swap_and_submit(active);
    }

    fn swap_and_submit(&self, active: u32) {
        let t0 = monotonic_ns();

        let submit = self.submit_queue();
        if submit.is_full() {
            self.reclaim_exhausted(active);
            return;
        }
        let Some(new_idx) = self.free_queue().pop() else {
            self.reclaim_exhausted(active);
            return;
        };

        let old_idx = self.hdr.active_idx.swap(new_idx, Ordering::AcqRel);
        let pushed = submit.push(old_idx);
        // Space was checked above and this thread is the only submit producer.
        debug_assert!(pushed);
        self.counters.note_queue_depth(u64::from(submit.len()));
        self.counters.ring_swaps.fetch_add(1, Ordering::Relaxed);
        self.counters
            .total_swap_duration_ns
            .fetch_add(monotonic_ns().saturating_sub(t0), Ordering::Relaxed);
        if self.kind() == LaneKind::Detail {
            self.clear_marked();
        }
    }

    /// Exhaustion path: no spare ring. Reclaim one slot in the active ring
    /// by dropping its oldest record; a never-submitted active ring has both
    /// ends owned by this thread, so the consumer-side `drop_oldest` is safe
    /// here. Soft-rotates as a last resort when even reclaim fails.
    ///
    /// The sacrificed record was counted into `events_written` when it was
    /// accepted, so it is reclassified: one off `events_written`, one onto
    /// `events_dropped`. `events_written + events_dropped` stays equal to
    /// the number of accepted invocations.
    fn reclaim_exhausted(&self, active: u32) {
        self.counters
            .pool_exhaustion_count
            .fetch_add(1, Ordering::Relaxed);
        if self.ring(active).drop_oldest() {
            self.counters.events_dropped.fetch_add(1, Ordering::Relaxed);
            self.counters.events_written.fetch_sub(1, Ordering::Relaxed);
        } else if self.hdr.ring_count > 1 {
            // Soft rotate. The next ring may be mid-drain; the ring protocol
            // tolerates a concurrent producer and consumer.
            let next = (active + 1) % self.hdr.ring_count;
            self.hdr.active_idx.store(next, Ordering::Release);
        }
    }

    // ---------------------------------------------------------------------
    // CONSUMER PROTOCOL (drain thread only)
    // ---------------------------------------------------------------------

    /// Pops the oldest submitted ring index, if any.
    #[inline]
    pub fn take_submitted(&self) -> Option<u32> {
        self.submit_queue().pop()
    }

    /// Returns an emptied ring to the free queue.
    pub fn return_ring(&self, idx: u32) {
        let pushed = self.free_queue().push(idx);
        // The free queue is sized for every ring in the pool; a failed push
        // means an index was duplicated somewhere.
        debug_assert!(pushed, "free queue rejected ring {idx}");
    }
}
