//! Bounded SPSC queue of ring indices.
//!
//! Each lane owns two of these: the submit queue (producer = traced thread,
//! consumer = drain) and the free queue (producer = drain, consumer = traced
//! thread). Same ordering discipline as the record ring: Acquire on the
//! opposite end's pointer, Release on the own end's pointer, one slot lost to
//! the full/empty sentinel, with a scalar `u32` payload instead of records.

#[cfg(debug_assertions)]
use crate::invariants::debug_assert_queue_distinct;
use std::sync::atomic::{AtomicU32, Ordering};

/// In-memory header of one queue region.
#[repr(C, align(64))]
pub struct QueueHdr {
    // line 0: immutable geometry
    capacity: u32,
    _pad0: [u8; 60],
    // line 1: producer-owned
    tail: AtomicU32,
    _pad1: [u8; 60],
    // line 2: consumer-owned
    head: AtomicU32,
    _pad2: [u8; 60],
}

/// Header size in bytes; the `u32` slot array starts here.
pub const QUEUE_HDR_SIZE: usize = 192;

const _: () = assert!(core::mem::size_of::<QueueHdr>() == QUEUE_HDR_SIZE);

/// Total bytes of a queue region, slot array padded out to whole cache lines.
#[inline]
pub const fn bytes_for_queue(capacity: u32) -> usize {
    QUEUE_HDR_SIZE + ((capacity as usize * 4) + 63) / 64 * 64
}

/// Smallest power-of-two capacity whose usable size (`capacity - 1`) holds
/// `n` entries.
#[inline]
pub const fn queue_capacity_for(n: u32) -> u32 {
    (n + 1).next_power_of_two()
}

/// A view over one queue region; see [`crate::ring::RingView`] for the
/// create/attach split.
pub struct QueueView<'a> {
    hdr: &'a QueueHdr,
    slots: *mut u32,
}

impl<'a> QueueView<'a> {
    /// Initializes a queue region and returns a view of it.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `bytes_for_queue(capacity)` writable
    /// bytes, 64-byte aligned, not concurrently accessed.
    pub unsafe fn create(base: *mut u8, capacity: u32) -> Self {
        assert!(capacity.is_power_of_two(), "queue capacity must be a power of two");
        let hdr = &mut *base.cast::<QueueHdr>();
        hdr.capacity = capacity;
        hdr.tail = AtomicU32::new(0);
        hdr.head = AtomicU32::new(0);
        Self::attach(base)
    }

    /// Attaches to an already-initialized queue region.
    ///
    /// # Safety
    ///
    /// `base` must point to a region previously initialized by `create` and
    /// mapped for at least `bytes_for_queue(capacity)` bytes.
    #[inline]
    pub unsafe fn attach(base: *mut u8) -> Self {
        let hdr = &*base.cast::<QueueHdr>();
        Self {
            hdr,
            slots: base.add(QUEUE_HDR_SIZE).cast::<u32>(),
        }
    }

    #[inline]
    fn mask(&self) -> u32 {
        self.hdr.capacity - 1
    }

    /// Entries currently queued.
    #[inline]
    pub fn len(&self) -> u32 {
        let t = self.hdr.tail.load(Ordering::Acquire);
        let h = self.hdr.head.load(Ordering::Acquire);
        t.wrapping_sub(h) & self.mask()
    }

    /// Returns `true` if nothing is queued.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if a push would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.mask()
    }

    /// Enqueues a ring index. Returns `false` if full.
    pub fn push(&self, value: u32) -> bool {
        let t = self.hdr.tail.load(Ordering::Relaxed);
        let next = t.wrapping_add(1) & self.mask();
        let h = self.hdr.head.load(Ordering::Acquire);
        if next == h {
            return false;
        }

        #[cfg(debug_assertions)]
        {
            let queued = self.debug_contains(value);
            debug_assert_queue_distinct!(queued, value);
        }

        // SAFETY: slot `t` is producer-owned until the Release store below
        // publishes it; the consumer only reads slots in `[head, tail)`.
        unsafe {
            *self.slots.add(t as usize) = value;
        }
        self.hdr.tail.store(next, Ordering::Release);
        true
    }

    /// Dequeues the oldest ring index, if any.
    pub fn pop(&self) -> Option<u32> {
        let h = self.hdr.head.load(Ordering::Relaxed);
        let t = self.hdr.tail.load(Ordering::Acquire);
        if h == t {
            return None;
        }
        // SAFETY: slot `h` was published by the producer's Release store of
        // `tail`, which the Acquire load above synchronizes with.
        let value = unsafe { *self.slots.add(h as usize) };
        self.hdr
            .head
            .store(h.wrapping_add(1) & self.mask(), Ordering::Release);
        Some(value)
    }

    /// Scans queued entries for `value`. Debug-build helper only; the scan
    /// races with the opposite end and is not used for protocol decisions.
    #[cfg(debug_assertions)]
    fn debug_contains(&self, value: u32) -> bool {
        let t = self.hdr.tail.load(Ordering::Relaxed);
        let h = self.hdr.head.load(Ordering::Acquire);
        let mut pos = h;
        while pos != t {
            // SAFETY: bounded by capacity; stale values are acceptable here.
            if unsafe { *self.slots.add(pos as usize) } == value {
                return true;
            }
            pos = pos.wrapping_add(1) & self.mask();
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_util::AlignedBuf;

    fn region(capacity: u32) -> AlignedBuf {
        AlignedBuf::new(bytes_for_queue(capacity))
    }

    #[test]
    fn fifo_order() {
        let mut mem = region(8);
        let q = unsafe { QueueView::create(mem.as_mut_ptr(), 8) };
        for i in 0..5 {
            assert!(q.push(i));
        }
        for i in 0..5 {
            assert_eq!(q.pop(), Some(i));
        }
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn sentinel_slot_limits_usable_capacity() {
        let mut mem = region(4);
        let q = unsafe { QueueView::create(mem.as_mut_ptr(), 4) };
        assert!(q.push(1));
        assert!(q.push(2));
        assert!(q.push(3));
        assert!(q.is_full());
        assert!(!q.push(4));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn capacity_for_holds_requested_entries() {
        assert_eq!(queue_capacity_for(1), 2);
        assert_eq!(queue_capacity_for(3), 4);
        assert_eq!(queue_capacity_for(4), 8);
        assert_eq!(queue_capacity_for(7), 8);
    }

    #[test]
    fn wraps_cleanly() {
        let mut mem = region(4);
        let q = unsafe { QueueView::create(mem.as_mut_ptr(), 4) };
        for round in 0..10 {
            assert!(q.push(round));
            assert_eq!(q.pop(), Some(round));
        }
        assert!(q.is_empty());
    }
}
