use std::hint;
use std::thread;
use std::time::Duration;

/// Adaptive idle backoff for the drain loop.
///
/// Progressively widens the wait when no submissions are found: spin with
/// PAUSE → yield to OS → bounded sleep, starting at 100 µs and doubling up
/// to a 10 ms cap. A successful drain resets the progression to zero.
#[derive(Debug)]
pub struct IdleBackoff {
    step: u32,
}

impl IdleBackoff {
    const SPIN_LIMIT: u32 = 6; // 2^6 = 64 spins max before yielding
    const YIELD_LIMIT: u32 = 10; // then start sleeping
    const SLEEP_START_US: u64 = 100;
    const SLEEP_CAP_US: u64 = 10_000;

    /// Creates a fresh backoff at the spin tier.
    #[inline]
    pub fn new() -> Self {
        Self { step: 0 }
    }

    /// One idle step. Spins or yields inline and returns `None`; once those
    /// tiers are exhausted, returns the duration the caller should sleep
    /// (or park on its wake channel) before polling again.
    pub fn idle(&mut self) -> Option<Duration> {
        if self.step <= Self::SPIN_LIMIT {
            let spins = 1 << self.step;
            for _ in 0..spins {
                hint::spin_loop();
            }
            self.step += 1;
            return None;
        }
        if self.step <= Self::YIELD_LIMIT {
            thread::yield_now();
            self.step += 1;
            return None;
        }
        let exp = (self.step - Self::YIELD_LIMIT - 1).min(63);
        let us = Self::SLEEP_START_US
            .saturating_mul(1u64 << exp)
            .min(Self::SLEEP_CAP_US);
        if us < Self::SLEEP_CAP_US {
            self.step += 1;
        }
        Some(Duration::from_micros(us))
    }

    /// Reset after useful work.
    #[inline]
    pub fn reset(&mut self) {
        self.step = 0;
    }
}

impl Default for IdleBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progresses_from_spin_to_capped_sleep() {
        let mut b = IdleBackoff::new();

        // Spin and yield tiers return no sleep.
        for _ in 0..=IdleBackoff::YIELD_LIMIT {
            assert_eq!(b.idle(), None);
        }

        // First sleep starts at 100 µs and doubles.
        assert_eq!(b.idle(), Some(Duration::from_micros(100)));
        assert_eq!(b.idle(), Some(Duration::from_micros(200)));

        // Runs up to the cap and stays there.
        let mut last = Duration::ZERO;
        for _ in 0..16 {
            last = b.idle().unwrap();
        }
        assert_eq!(last, Duration::from_millis(10));
        assert_eq!(b.idle(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn reset_returns_to_spinning() {
        let mut b = IdleBackoff::new();
        for _ in 0..20 {
            b.idle();
        }
        b.reset();
        assert_eq!(b.idle(), None);
    }
}
