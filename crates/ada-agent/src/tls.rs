//! Thread-local fast path.
//!
//! The first hook on a thread registers it with the fabric and caches the
//! slot index here; every later hook goes straight to its lanes without
//! touching the registry. The state also carries the reentrancy guard, the
//! call depth, and the thread's sequence counters, all single-thread
//! plain values behind `Cell`.

use crate::session::AgentSession;
use std::cell::Cell;

pub(crate) struct ThreadState {
    /// Session token this state was registered against; a mismatch forces
    /// re-registration (a new session started in-process).
    pub token: Cell<u64>,
    pub registered: Cell<bool>,
    pub slot_index: Cell<u32>,
    pub thread_id: Cell<u32>,
    pub in_handler: Cell<bool>,
    pub call_depth: Cell<u32>,
    /// Next index-event ordinal for this thread.
    pub index_seq: Cell<u64>,
    /// Next detail-event ordinal for this thread.
    pub detail_seq: Cell<u64>,
}

impl ThreadState {
    fn new() -> Self {
        Self {
            token: Cell::new(0),
            registered: Cell::new(false),
            slot_index: Cell::new(0),
            thread_id: Cell::new(0),
            in_handler: Cell::new(false),
            call_depth: Cell::new(0),
            index_seq: Cell::new(0),
            detail_seq: Cell::new(0),
        }
    }

    /// Resets sequence state for a fresh registration.
    pub fn rebind(&self, token: u64, slot_index: u32, thread_id: u32) {
        self.token.set(token);
        self.slot_index.set(slot_index);
        self.thread_id.set(thread_id);
        self.registered.set(true);
        self.call_depth.set(0);
        self.index_seq.set(0);
        self.detail_seq.set(0);
    }
}

impl Drop for ThreadState {
    fn drop(&mut self) {
        // Thread exit: flip the slot inactive. The slot itself stays claimed
        // for the rest of the session.
        if self.registered.get() {
            if let Some(session) = AgentSession::global() {
                if session.token() == self.token.get() {
                    session
                        .fabric()
                        .registry()
                        .slot(self.slot_index.get())
                        .set_inactive();
                }
            }
        }
    }
}

thread_local! {
    pub(crate) static STATE: ThreadState = ThreadState::new();
}

/// OS id of the calling thread.
pub fn current_thread_id() -> u32 {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: gettid has no preconditions.
        unsafe { libc::gettid() as u32 }
    }
    #[cfg(target_os = "macos")]
    {
        let mut tid: u64 = 0;
        // SAFETY: null pthread means "calling thread"; tid is a valid out
        // pointer.
        unsafe { libc::pthread_threadid_np(std::ptr::null_mut(), &mut tid) };
        tid as u32
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        std::thread::current().id().hash(&mut hasher);
        hasher.finish() as u32
    }
}

/// Marks the calling thread's slot inactive in `session`'s registry and
/// forgets the cached registration.
pub fn unregister_current_thread(session: &AgentSession) {
    STATE.with(|state| {
        if state.registered.get() && state.token.get() == session.token() {
            session
                .fabric()
                .registry()
                .slot(state.slot_index.get())
                .set_inactive();
            state.registered.set(false);
        }
    });
}
