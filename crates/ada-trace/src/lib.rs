//! ada-trace: lock-free tracing fabric over shared memory.
//!
//! The fabric moves function call/return events from hooked threads in a
//! target process to an out-of-process collector at millions of events per
//! second per core. Each traced thread owns a pair of lanes in shared
//! memory: the index lane carries fixed 32-byte records for every event,
//! the detail lane carries variable-content records (argument registers,
//! return values, a shallow stack window) that are only persisted when a
//! configured trigger pattern marks the window.
//!
//! Each lane is a pool of SPSC ring buffers with one active ring. A full
//! active ring is swapped against a spare and handed to the drain thread
//! through an SPSC submit queue; drained rings flow back through a free
//! queue. Nothing on the write path locks, blocks, or allocates.
//!
//! # Example
//!
//! ```
//! use ada_trace::{Fabric, WriteOutcome, SMALL_FABRIC_CONFIG};
//!
//! let fabric = Fabric::create_anonymous(SMALL_FABRIC_CONFIG).unwrap();
//! let slot = fabric.registry().register(1234).unwrap();
//!
//! let record = [0u8; 32];
//! let outcome = fabric.lanes(slot).index_pool().write_record(&record);
//! assert_eq!(outcome, WriteOutcome::Written);
//! ```

mod arena;
mod backoff;
mod clock;
mod config;
mod error;
mod event;
mod fabric;
mod invariants;
mod layout;
mod marking;
mod metrics;
mod pool;
mod queue;
mod registry;
mod ring;
mod symbols;
#[cfg(test)]
mod test_util;

pub use arena::{arena_name, ArenaDirectory, ArenaRole, DirEntry, SharedArena, ARENA_MAGIC, ARENA_VERSION};
pub use backoff::IdleBackoff;
pub use clock::monotonic_ns;
pub use config::{
    FabricConfig, DEEP_CAPTURE_CONFIG, DEFAULT_STACK_CAPTURE_BYTES, MAX_STACK_CAPTURE_BYTES,
    MAX_THREADS, SMALL_FABRIC_CONFIG,
};
pub use error::FabricError;
pub use event::{
    detail_flags, function_module_id, function_ordinal, make_function_id, DetailEventHeader,
    DetailEventType, EventKind, IndexEvent, DETAIL_HEADER_SIZE, INDEX_EVENT_SIZE, NO_DETAIL,
};
pub use fabric::{Fabric, ThreadLanes};
pub use layout::FabricLayout;
pub use marking::{CaseMode, MarkingPolicy, TriggerPattern};
pub use metrics::{
    LaneCounters, LaneCountersSnapshot, RateSample, RateWindow, ThreadCounters,
};
pub use pool::{bytes_for_lane, LaneGeometry, LaneKind, LanePool, WriteOutcome};
pub use queue::{bytes_for_queue, queue_capacity_for, QueueView};
pub use registry::{bytes_for_registry, RegistryView, ThreadSlot};
pub use ring::{bytes_for_ring, RingView};
pub use symbols::{
    fnv1a_32_ci_nonzero, fnv1a_64, fnv1a_64_ci, is_swift_symbol, ExcludeSet, HookRegistry,
    SymbolHashSet, DEFAULT_EXCLUDES,
};
