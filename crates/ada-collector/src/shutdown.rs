//! Shutdown trigger.
//!
//! The controller hands one of these to its signal handler. `request` does
//! exactly two things, both async-signal safe: a release store of the flag
//! and a one-byte write into the wake pipe. Every other shutdown step
//! (closing the registration gate, flipping the per-thread event gates,
//! final drain, file finalization) runs on the drain thread once it observes
//! the flag.

use crate::wake::WakeHandle;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable shutdown handle. Repeated requests are no-ops.
#[derive(Clone)]
pub struct ShutdownController {
    requested: Arc<AtomicBool>,
    wake: WakeHandle,
}

impl ShutdownController {
    pub(crate) fn new(requested: Arc<AtomicBool>, wake: WakeHandle) -> Self {
        Self { requested, wake }
    }

    /// Requests shutdown. Safe to call from a signal handler: no
    /// allocation, no locks, no formatting.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
        self.wake.wake();
    }

    /// True once shutdown has been requested.
    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::WakeReceiver;
    use std::time::Duration;

    #[test]
    fn request_sets_flag_and_wakes() {
        let (handle, receiver) = WakeReceiver::new().unwrap();
        let ctl = ShutdownController::new(Arc::new(AtomicBool::new(false)), handle);

        assert!(!ctl.is_requested());
        ctl.request();
        assert!(ctl.is_requested());
        assert!(receiver.wait(Duration::from_millis(100)));

        // Idempotent.
        ctl.request();
        assert!(ctl.is_requested());
    }
}
