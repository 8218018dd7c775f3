//! Debug assertion macros for fabric invariants.
//!
//! These provide runtime checks for the invariants documented alongside the
//! structures they protect. They are only active in debug builds
//! (`#[cfg(debug_assertions)]`), so there is zero overhead in release builds.
//!
//! Used by `ring.rs`, `queue.rs`, and `pool.rs`.

// =============================================================================
// INV-RING-01: Bounded Occupancy
// =============================================================================

/// Assert that ring occupancy never exceeds `capacity - 1` (one slot is the
/// full/empty sentinel).
///
/// **Invariant**: `0 <= (write - read) mod capacity <= capacity - 1`
macro_rules! debug_assert_ring_occupancy {
    ($occupied:expr, $capacity:expr) => {
        debug_assert!(
            $occupied < $capacity,
            "INV-RING-01 violated: occupancy {} not below capacity {}",
            $occupied,
            $capacity
        )
    };
}

// =============================================================================
// INV-RING-02: Position In Range
// =============================================================================

/// Assert that a ring position is a valid slot index.
///
/// **Invariant**: `position < capacity` (positions are stored pre-masked)
macro_rules! debug_assert_pos_in_range {
    ($name:literal, $pos:expr, $capacity:expr) => {
        debug_assert!(
            $pos < $capacity,
            "INV-RING-02 violated: {} position {} outside capacity {}",
            $name,
            $pos,
            $capacity
        )
    };
}

// =============================================================================
// INV-Q-01: Distinct Entries
// =============================================================================

/// Assert that a ring index is not already queued.
///
/// **Invariant**: no ring index appears twice in a submit or free queue.
macro_rules! debug_assert_queue_distinct {
    ($already_queued:expr, $value:expr) => {
        debug_assert!(
            !$already_queued,
            "INV-Q-01 violated: ring index {} enqueued twice",
            $value
        )
    };
}

// =============================================================================
// INV-POOL-01: Ring Conservation
// =============================================================================

/// Assert that every pool ring is accounted for.
///
/// **Invariant**: under quiescence, `|submit| + |free| + 1 (active) == K`.
/// Only checked at points where both queue ends are owned by the caller
/// (construction, final drain).
macro_rules! debug_assert_ring_conservation {
    ($in_submit:expr, $in_free:expr, $ring_count:expr) => {
        debug_assert!(
            $in_submit + $in_free + 1 == $ring_count as usize,
            "INV-POOL-01 violated: {} submitted + {} free + 1 active != {} rings",
            $in_submit,
            $in_free,
            $ring_count
        )
    };
}

// =============================================================================
// Re-exports for crate-internal use
// =============================================================================

pub(crate) use debug_assert_pos_in_range;
pub(crate) use debug_assert_queue_distinct;
pub(crate) use debug_assert_ring_conservation;
pub(crate) use debug_assert_ring_occupancy;
