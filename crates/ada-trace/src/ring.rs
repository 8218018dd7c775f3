use crate::invariants::{debug_assert_pos_in_range, debug_assert_ring_occupancy};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

// =============================================================================
// MEMORY ORDERING & SYNCHRONIZATION STRATEGY
// =============================================================================
//
// This SPSC ring buffer carries fixed-width records through a raw memory
// region shared between two processes. The protocol:
//
// ## Positions
//
// `write_pos` and `read_pos` are u32 slot indices stored pre-masked, i.e.
// always in `[0, capacity)`. The ring is full when `(write + 1) & mask ==
// read` and empty when `write == read`, so one slot is permanently the
// full/empty sentinel and usable capacity is `capacity - 1`.
//
// ## Memory Ordering Protocol
//
// **Producer (write path):**
// 1. Load `read_pos` with Acquire (synchronizes with consumer's Release)
// 2. If `(write + 1) & mask == read`: bump `overflow_count` Relaxed, fail
// 3. Copy the record into slot `write * event_size` (plain memory writes)
// 4. Store `write_pos = (write + 1) & mask` with Release (publishes the copy)
//
// **Consumer (read path):**
// 1. Load `write_pos` with Acquire (synchronizes with producer's Release)
// 2. If `read == write`: fail (empty)
// 3. Copy the record out of slot `read * event_size`
// 4. Store `read_pos = (read + 1) & mask` with Release (releases the slot)
//
// `drop_oldest` is the consumer-side reclaim used on the exhaustion path: it
// advances `read_pos` without copying, sacrificing the oldest record.
//
// ## Single-Writer Invariants
//
// Exactly one thread stores `write_pos` (the owning producer) and exactly one
// thread stores `read_pos` (whoever currently holds the consumer role: the
// drain for submitted rings, the producer itself for its not-yet-submitted
// active ring). Slot bytes in `[read, write)` are owned by the consumer;
// slots in `[write, read)` are owned by the producer.
//
// =============================================================================

/// Fixed in-memory header of one ring. Lives at the start of the ring's
/// region inside a lane arena.
///
/// Geometry is immutable after creation and sits on its own cache line; the
/// producer-written fields (`write_pos`, `overflow_count`) and the
/// consumer-written field (`read_pos`) each get a dedicated line so the two
/// sides never false-share.
#[repr(C, align(64))]
pub struct RingHdr {
    // line 0: immutable geometry
    capacity: u32,
    event_size: u32,
    _pad0: [u8; 56],
    // line 1: producer-owned
    write_pos: AtomicU32,
    _pad1: [u8; 4],
    overflow_count: AtomicU64,
    _pad2: [u8; 48],
    // line 2: consumer-owned
    read_pos: AtomicU32,
    _pad3: [u8; 60],
}

/// Header size in bytes; record slots start at this offset.
pub const RING_HDR_SIZE: usize = 192;

const _: () = assert!(core::mem::size_of::<RingHdr>() == RING_HDR_SIZE);

/// Total bytes of a ring region: header plus `capacity` fixed-width slots.
#[inline]
pub const fn bytes_for_ring(capacity: u32, event_size: u32) -> usize {
    RING_HDR_SIZE + capacity as usize * event_size as usize
}

/// A view over one ring region.
///
/// The view does not own its storage: it is materialized per call from an
/// arena base pointer and an offset, used, and dropped. `create` initializes
/// the header (controller side at arena construction); `attach` assumes an
/// initialized header (both sides afterwards).
pub struct RingView<'a> {
    hdr: &'a RingHdr,
    data: *mut u8,
}

impl<'a> RingView<'a> {
    /// Initializes a ring region and returns a view of it.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `bytes_for_ring(capacity, event_size)`
    /// writable bytes, 64-byte aligned, not concurrently accessed.
    pub unsafe fn create(base: *mut u8, capacity: u32, event_size: u32) -> Self {
        assert!(capacity.is_power_of_two(), "ring capacity must be a power of two");
        assert!(event_size > 0, "ring event size must be nonzero");
        let hdr = &mut *base.cast::<RingHdr>();
        hdr.capacity = capacity;
        hdr.event_size = event_size;
        hdr.write_pos = AtomicU32::new(0);
        hdr.read_pos = AtomicU32::new(0);
        hdr.overflow_count = AtomicU64::new(0);
        Self::attach(base)
    }

    /// Attaches to an already-initialized ring region.
    ///
    /// # Safety
    ///
    /// `base` must point to a region previously initialized by `create` (in
    /// this or another process) and mapped for at least
    /// `bytes_for_ring(capacity, event_size)` bytes.
    #[inline]
    pub unsafe fn attach(base: *mut u8) -> Self {
        let hdr = &*base.cast::<RingHdr>();
        Self {
            hdr,
            data: base.add(RING_HDR_SIZE),
        }
    }

    // ---------------------------------------------------------------------
    // GEOMETRY & STATUS
    // ---------------------------------------------------------------------

    /// Slot count, a power of two. Usable occupancy is `capacity() - 1`.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.hdr.capacity
    }

    /// Fixed record width in bytes.
    #[inline]
    pub fn event_size(&self) -> u32 {
        self.hdr.event_size
    }

    #[inline]
    fn mask(&self) -> u32 {
        self.hdr.capacity - 1
    }

    /// Records currently readable. Stale the instant it returns.
    #[inline]
    pub fn available_read(&self) -> u32 {
        let w = self.hdr.write_pos.load(Ordering::Acquire);
        let r = self.hdr.read_pos.load(Ordering::Acquire);
        w.wrapping_sub(r) & self.mask()
    }

    /// Slots currently writable.
    #[inline]
    pub fn available_write(&self) -> u32 {
        self.mask() - self.available_read()
    }

    /// Returns `true` if no record is readable.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.available_read() == 0
    }

    /// Number of writes rejected because the ring was full.
    #[inline]
    pub fn overflow_count(&self) -> u64 {
        self.hdr.overflow_count.load(Ordering::Relaxed)
    }

    // ---------------------------------------------------------------------
    // PRODUCER API
    // ---------------------------------------------------------------------

    /// Copies one record into the ring. Returns `false` (and bumps the
    /// overflow counter) if the ring is full.
    ///
    /// `record` may be shorter than the slot width; the remainder of the slot
    /// is left untouched. It must not be longer.
    pub fn write(&self, record: &[u8]) -> bool {
        let event_size = self.hdr.event_size as usize;
        debug_assert!(record.len() <= event_size);

        let w = self.hdr.write_pos.load(Ordering::Relaxed);
        let next = w.wrapping_add(1) & self.mask();
        let r = self.hdr.read_pos.load(Ordering::Acquire);
        if next == r {
            self.hdr.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        debug_assert_pos_in_range!("write", w, self.hdr.capacity);
        // SAFETY: slot `w` is owned by the producer: `w != read - 1` was just
        // established, the consumer only reads slots in `[read, write)`, and
        // the Release store below publishes the copy before the slot becomes
        // readable.
        unsafe {
            std::ptr::copy_nonoverlapping(
                record.as_ptr(),
                self.data.add(w as usize * event_size),
                record.len(),
            );
        }
        self.hdr.write_pos.store(next, Ordering::Release);
        true
    }

    // ---------------------------------------------------------------------
    // CONSUMER API
    // ---------------------------------------------------------------------

    /// Copies the oldest record out of the ring. Returns `false` if empty.
    pub fn read(&self, out: &mut [u8]) -> bool {
        self.read_batch(out, 1) == 1
    }

    /// Copies up to `max` records into `out`, advancing `read_pos` once.
    ///
    /// `out` must hold at least `max * event_size()` bytes. Returns the
    /// number of records copied. The single Release store at the end
    /// amortizes the cross-core traffic over the whole batch.
    pub fn read_batch(&self, out: &mut [u8], max: usize) -> usize {
        let event_size = self.hdr.event_size as usize;
        if max == 0 {
            return 0;
        }
        debug_assert!(out.len() >= max * event_size);

        let r = self.hdr.read_pos.load(Ordering::Relaxed);
        let w = self.hdr.write_pos.load(Ordering::Acquire);
        let avail = (w.wrapping_sub(r) & self.mask()) as usize;
        if avail == 0 {
            return 0;
        }
        debug_assert_ring_occupancy!(avail as u32, self.hdr.capacity);

        let count = avail.min(max);
        let mask = self.mask();
        let mut pos = r;
        for i in 0..count {
            debug_assert_pos_in_range!("read", pos, self.hdr.capacity);
            // SAFETY: slots in `[read, write)` were fully written by the
            // producer and published by its Release store; the Acquire load
            // of `write_pos` above synchronizes with it. The producer will
            // not reuse these slots until `read_pos` advances below.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    self.data.add(pos as usize * event_size),
                    out.as_mut_ptr().add(i * event_size),
                    event_size,
                );
            }
            pos = pos.wrapping_add(1) & mask;
        }
        self.hdr.read_pos.store(pos, Ordering::Release);
        count
    }

    /// Sacrifices the oldest record by advancing `read_pos` without copying.
    ///
    /// Consumer-side reclaim for the pool exhaustion path. Returns `false`
    /// if the ring was empty.
    pub fn drop_oldest(&self) -> bool {
        let r = self.hdr.read_pos.load(Ordering::Relaxed);
        let w = self.hdr.write_pos.load(Ordering::Acquire);
        if r == w {
            return false;
        }
        self.hdr
            .read_pos
            .store(r.wrapping_add(1) & self.mask(), Ordering::Release);
        true
    }

    /// Discards every readable record by advancing `read_pos` to `write_pos`.
    ///
    /// Used when a detail ring is recycled in place. Returns the number of
    /// records discarded. May only be called by whoever holds the consumer
    /// role for this ring.
    pub fn discard_all(&self) -> u32 {
        let r = self.hdr.read_pos.load(Ordering::Relaxed);
        let w = self.hdr.write_pos.load(Ordering::Acquire);
        let dropped = w.wrapping_sub(r) & self.mask();
        if dropped != 0 {
            self.hdr.read_pos.store(w, Ordering::Release);
        }
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_util::AlignedBuf;

    fn region(capacity: u32, event_size: u32) -> AlignedBuf {
        AlignedBuf::new(bytes_for_ring(capacity, event_size))
    }

    #[test]
    fn write_read_roundtrip() {
        let mut mem = region(8, 4);
        let ring = unsafe { RingView::create(mem.as_mut_ptr(), 8, 4) };

        assert!(ring.write(&7u32.to_le_bytes()));
        assert!(ring.write(&9u32.to_le_bytes()));
        assert_eq!(ring.available_read(), 2);

        let mut out = [0u8; 4];
        assert!(ring.read(&mut out));
        assert_eq!(u32::from_le_bytes(out), 7);
        assert!(ring.read(&mut out));
        assert_eq!(u32::from_le_bytes(out), 9);
        assert!(ring.is_empty());
    }

    #[test]
    fn full_ring_counts_overflow() {
        let mut mem = region(4, 4);
        let ring = unsafe { RingView::create(mem.as_mut_ptr(), 4, 4) };

        // capacity 4 => 3 usable slots
        for i in 0u32..3 {
            assert!(ring.write(&i.to_le_bytes()));
        }
        assert!(!ring.write(&99u32.to_le_bytes()));
        assert!(!ring.write(&99u32.to_le_bytes()));
        assert_eq!(ring.overflow_count(), 2);
        assert_eq!(ring.available_write(), 0);
    }

    #[test]
    fn batch_read_wraps_around() {
        let mut mem = region(4, 8);
        let ring = unsafe { RingView::create(mem.as_mut_ptr(), 4, 8) };

        // Push the positions around the wrap point.
        let mut out = [0u8; 8 * 4];
        for round in 0u64..5 {
            assert!(ring.write(&(round * 2).to_le_bytes()));
            assert!(ring.write(&(round * 2 + 1).to_le_bytes()));
            let n = ring.read_batch(&mut out, 4);
            assert_eq!(n, 2);
            assert_eq!(u64::from_le_bytes(out[0..8].try_into().unwrap()), round * 2);
            assert_eq!(u64::from_le_bytes(out[8..16].try_into().unwrap()), round * 2 + 1);
        }
    }

    #[test]
    fn drop_oldest_reclaims_one_slot() {
        let mut mem = region(4, 4);
        let ring = unsafe { RingView::create(mem.as_mut_ptr(), 4, 4) };

        for i in 0u32..3 {
            assert!(ring.write(&i.to_le_bytes()));
        }
        assert!(!ring.write(&3u32.to_le_bytes()));
        assert!(ring.drop_oldest());
        assert!(ring.write(&3u32.to_le_bytes()));

        // Oldest record (0) is gone; 1, 2, 3 remain in order.
        let mut out = [0u8; 4];
        for expect in 1u32..4 {
            assert!(ring.read(&mut out));
            assert_eq!(u32::from_le_bytes(out), expect);
        }
        assert!(!ring.drop_oldest());
    }

    #[test]
    fn attach_sees_created_state() {
        let mut mem = region(8, 4);
        {
            let ring = unsafe { RingView::create(mem.as_mut_ptr(), 8, 4) };
            assert!(ring.write(&5u32.to_le_bytes()));
        }
        let ring = unsafe { RingView::attach(mem.as_mut_ptr()) };
        assert_eq!(ring.capacity(), 8);
        assert_eq!(ring.event_size(), 4);
        assert_eq!(ring.available_read(), 1);
    }

    #[test]
    fn discard_all_empties_the_ring() {
        let mut mem = region(8, 4);
        let ring = unsafe { RingView::create(mem.as_mut_ptr(), 8, 4) };
        for i in 0u32..5 {
            assert!(ring.write(&i.to_le_bytes()));
        }
        assert_eq!(ring.discard_all(), 5);
        assert!(ring.is_empty());
        assert_eq!(ring.discard_all(), 0);
    }
}
