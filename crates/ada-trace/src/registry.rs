//! Global slot table of traced threads.
//!
//! The registry lives in the control arena. The controller creates it; the
//! agent maps the same memory read/write. A thread claims a slot once, on its
//! first hook, by a bounded `fetch_add` on `thread_count`; slots are never
//! freed during a session, only flipped to inactive on thread exit. The
//! drain iterates slots `0..thread_count` read-only.

use crate::error::FabricError;
use crate::metrics::ThreadCounters;
use std::sync::atomic::{AtomicU32, Ordering};

/// In-memory header of the registry block.
#[repr(C, align(64))]
pub struct RegistryHdr {
    // line 0: immutable geometry
    capacity: u32,
    _pad0: [u8; 60],
    // line 1: shared mutable flags
    thread_count: AtomicU32,
    accepting_registrations: AtomicU32,
    shutdown_requested: AtomicU32,
    _pad1: [u8; 52],
}

const REGISTRY_HDR_SIZE: usize = 128;
const _: () = assert!(core::mem::size_of::<RegistryHdr>() == REGISTRY_HDR_SIZE);

/// One registry slot. Assigned monotonically, immutable once ready except
/// for the flags and counters. Exactly one cache line so neighbouring slots
/// never false-share.
#[repr(C, align(64))]
pub struct ThreadSlot {
    thread_id: AtomicU32,
    /// Publication flag: the slot's fields are initialized and visible.
    ready: AtomicU32,
    active: AtomicU32,
    accepting_events: AtomicU32,
    /// Thread-level counters (reentrancy, stack-capture failures).
    pub counters: ThreadCounters,
    _pad: [u8; 16],
}

const _: () = assert!(core::mem::size_of::<ThreadSlot>() == 64);

impl ThreadSlot {
    /// OS thread id that claimed this slot.
    #[inline]
    pub fn thread_id(&self) -> u32 {
        self.thread_id.load(Ordering::Relaxed)
    }

    /// Slot fields are initialized and safe to read.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire) != 0
    }

    /// Thread has registered and not yet exited.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed) != 0
    }

    /// Marks the thread as exited. The slot itself stays claimed.
    pub fn set_inactive(&self) {
        self.active.store(0, Ordering::Release);
    }

    /// Hot-path gate: a relaxed load, so a flip may be missed by a few
    /// events; the miss is accounted, not prevented.
    #[inline]
    pub fn accepting_events(&self) -> bool {
        self.accepting_events.load(Ordering::Relaxed) != 0
    }

    /// Closes (or reopens) the event gate for this thread.
    pub fn set_accepting_events(&self, accepting: bool) {
        self.accepting_events
            .store(u32::from(accepting), Ordering::Release);
    }
}

/// Total bytes of the registry block.
#[inline]
pub const fn bytes_for_registry(capacity: u32) -> usize {
    REGISTRY_HDR_SIZE + capacity as usize * core::mem::size_of::<ThreadSlot>()
}

/// View over the registry block.
pub struct RegistryView<'a> {
    hdr: &'a RegistryHdr,
    slots: *mut ThreadSlot,
}

impl<'a> RegistryView<'a> {
    /// Initializes the registry: no threads, registrations open.
    ///
    /// # Safety
    ///
    /// `base` must point to at least `bytes_for_registry(capacity)` writable
    /// zeroed bytes, 64-byte aligned, not concurrently accessed.
    pub unsafe fn create(base: *mut u8, capacity: u32) -> Self {
        let hdr = &mut *base.cast::<RegistryHdr>();
        hdr.capacity = capacity;
        hdr.thread_count = AtomicU32::new(0);
        hdr.accepting_registrations = AtomicU32::new(1);
        hdr.shutdown_requested = AtomicU32::new(0);
        Self::attach(base)
    }

    /// Attaches to an already-initialized registry block.
    ///
    /// # Safety
    ///
    /// `base` must point to a block previously initialized by `create` and
    /// mapped for its full size.
    #[inline]
    pub unsafe fn attach(base: *mut u8) -> Self {
        let hdr = &*base.cast::<RegistryHdr>();
        Self {
            hdr,
            slots: base.add(REGISTRY_HDR_SIZE).cast::<ThreadSlot>(),
        }
    }

    /// Registry slot capacity.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.hdr.capacity
    }

    /// Number of claimed slots. Slots `0..thread_count()` may be iterated,
    /// skipping any whose `is_ready` is still false (mid-initialization).
    #[inline]
    pub fn thread_count(&self) -> u32 {
        self.hdr.thread_count.load(Ordering::Acquire).min(self.hdr.capacity)
    }

    /// Borrows slot `idx`.
    #[inline]
    pub fn slot(&self, idx: u32) -> &'a ThreadSlot {
        debug_assert!(idx < self.hdr.capacity);
        // SAFETY: idx is bounded by capacity and the slot array was mapped
        // with the block.
        unsafe { &*self.slots.add(idx as usize) }
    }

    /// Finds the slot already claimed by `thread_id`, if any.
    pub fn find(&self, thread_id: u32) -> Option<u32> {
        let count = self.thread_count();
        (0..count).find(|&i| {
            let slot = self.slot(i);
            slot.is_ready() && slot.thread_id() == thread_id
        })
    }

    /// Claims a slot for `thread_id`, or returns the one it already holds.
    ///
    /// Idempotent per thread id. Fails when registrations are closed or the
    /// table is full; the caller counts the failure and traces nothing for
    /// that thread.
    pub fn register(&self, thread_id: u32) -> Result<u32, FabricError> {
        if let Some(idx) = self.find(thread_id) {
            return Ok(idx);
        }
        if self.hdr.accepting_registrations.load(Ordering::Acquire) == 0 {
            return Err(FabricError::RegistrationRejected("registrations closed"));
        }

        let idx = self.hdr.thread_count.fetch_add(1, Ordering::SeqCst);
        if idx >= self.hdr.capacity {
            self.hdr.thread_count.fetch_sub(1, Ordering::SeqCst);
            return Err(FabricError::RegistrationRejected("registry full"));
        }

        let slot = self.slot(idx);
        slot.thread_id.store(thread_id, Ordering::Relaxed);
        slot.active.store(1, Ordering::Relaxed);
        slot.accepting_events.store(1, Ordering::Relaxed);
        slot.counters.reset();
        // Publish: readers that observe ready == 1 see the fields above.
        slot.ready.store(1, Ordering::Release);
        Ok(idx)
    }

    /// Number of ready slots whose thread has not exited.
    pub fn active_count(&self) -> u32 {
        let count = self.thread_count();
        (0..count)
            .filter(|&i| {
                let slot = self.slot(i);
                slot.is_ready() && slot.is_active()
            })
            .count() as u32
    }

    /// Gate for new registrations; closed during shutdown.
    pub fn set_accepting_registrations(&self, accepting: bool) {
        self.hdr
            .accepting_registrations
            .store(u32::from(accepting), Ordering::Release);
    }

    /// Raises the global shutdown flag.
    pub fn request_shutdown(&self) {
        self.hdr.shutdown_requested.store(1, Ordering::Release);
    }

    /// True once shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.hdr.shutdown_requested.load(Ordering::Acquire) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::test_util::AlignedBuf;

    fn region(capacity: u32) -> AlignedBuf {
        AlignedBuf::new(bytes_for_registry(capacity))
    }

    #[test]
    fn register_is_idempotent() {
        let mut mem = region(4);
        let reg = unsafe { RegistryView::create(mem.as_mut_ptr(), 4) };

        let a = reg.register(100).unwrap();
        let b = reg.register(100).unwrap();
        assert_eq!(a, b);
        assert_eq!(reg.thread_count(), 1);
    }

    #[test]
    fn slots_assign_monotonically() {
        let mut mem = region(4);
        let reg = unsafe { RegistryView::create(mem.as_mut_ptr(), 4) };

        assert_eq!(reg.register(10).unwrap(), 0);
        assert_eq!(reg.register(20).unwrap(), 1);
        assert_eq!(reg.register(30).unwrap(), 2);
        assert_eq!(reg.find(20), Some(1));
        assert_eq!(reg.find(99), None);
    }

    #[test]
    fn full_registry_rejects() {
        let mut mem = region(2);
        let reg = unsafe { RegistryView::create(mem.as_mut_ptr(), 2) };

        reg.register(1).unwrap();
        reg.register(2).unwrap();
        assert!(reg.register(3).is_err());
        assert_eq!(reg.thread_count(), 2);
    }

    #[test]
    fn closed_registry_rejects_new_threads_only() {
        let mut mem = region(4);
        let reg = unsafe { RegistryView::create(mem.as_mut_ptr(), 4) };

        let idx = reg.register(7).unwrap();
        reg.set_accepting_registrations(false);
        // Existing thread still resolves; new thread is turned away.
        assert_eq!(reg.register(7).unwrap(), idx);
        assert!(reg.register(8).is_err());
    }

    #[test]
    fn inactive_slots_leave_active_count() {
        let mut mem = region(4);
        let reg = unsafe { RegistryView::create(mem.as_mut_ptr(), 4) };

        let a = reg.register(1).unwrap();
        reg.register(2).unwrap();
        assert_eq!(reg.active_count(), 2);

        reg.slot(a).set_inactive();
        assert_eq!(reg.active_count(), 1);
        // The slot stays claimed for the life of the session.
        assert_eq!(reg.thread_count(), 2);
    }

    #[test]
    fn shutdown_flag_roundtrip() {
        let mut mem = region(2);
        let reg = unsafe { RegistryView::create(mem.as_mut_ptr(), 2) };
        assert!(!reg.shutdown_requested());
        reg.request_shutdown();
        assert!(reg.shutdown_requested());
    }
}
