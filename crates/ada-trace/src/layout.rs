//! Composite arena layout.
//!
//! Three arenas make up a session: the control arena (header, directory,
//! thread registry) and one lane arena per lane kind, each holding one lane
//! block per registry slot. Every block position is computed from the fabric
//! configuration alone, so both processes derive identical offsets without
//! exchanging pointers.
//!
//! ```text
//! control arena                     index / detail arena
//! ┌──────────────────┐              ┌──────────────────┐
//! │ ArenaHdr   (64B) │              │ ArenaHdr   (64B) │
//! ├──────────────────┤              ├──────────────────┤
//! │ Directory  (64B) │              │ lane block  [0]  │
//! ├──────────────────┤              ├──────────────────┤
//! │ ConfigBlock (64B)│              │ lane block  [1]  │
//! ├──────────────────┤              ├──────────────────┤
//! │ RegistryHdr      │              │       ...        │
//! │ ThreadSlot[0..N] │              │                  │
//! └──────────────────┘              └──────────────────┘
//! ```

use crate::config::{FabricConfig, MAX_STACK_CAPTURE_BYTES, MAX_THREADS};
use crate::error::FabricError;
use crate::event::INDEX_EVENT_SIZE;
use crate::pool::{bytes_for_lane, LaneGeometry, LaneKind};
use crate::registry::bytes_for_registry;

/// Arena header size; the payload starts at this offset.
pub const ARENA_HDR_SIZE: usize = 64;

/// Directory block size inside the control arena.
pub const DIRECTORY_SIZE: usize = 64;

/// Offset of the config block inside the control arena.
pub const CONFIG_OFFSET: usize = ARENA_HDR_SIZE + DIRECTORY_SIZE;

/// Fabric geometry persisted in the control arena, so the agent derives the
/// exact same layout the controller built without any out-of-band exchange.
#[repr(C, align(64))]
pub struct ConfigBlock {
    max_threads: u32,
    index_ring_bits: u32,
    index_ring_count: u32,
    detail_ring_bits: u32,
    detail_ring_count: u32,
    detail_slot_size: u32,
    stack_capture_bytes: u32,
    _pad: [u8; 36],
}

const _: () = assert!(core::mem::size_of::<ConfigBlock>() == 64);

impl ConfigBlock {
    /// Records `config` (controller side, arena construction).
    pub fn store(&mut self, config: &FabricConfig) {
        self.max_threads = config.max_threads;
        self.index_ring_bits = u32::from(config.index_ring_bits);
        self.index_ring_count = config.index_ring_count;
        self.detail_ring_bits = u32::from(config.detail_ring_bits);
        self.detail_ring_count = config.detail_ring_count;
        self.detail_slot_size = config.detail_slot_size;
        self.stack_capture_bytes = config.stack_capture_bytes;
    }

    /// Reads the configuration back, validating the recorded bounds.
    pub fn load(&self) -> Result<FabricConfig, FabricError> {
        let valid = self.max_threads >= 1
            && self.max_threads <= MAX_THREADS
            && (1..=20).contains(&self.index_ring_bits)
            && (1..=20).contains(&self.detail_ring_bits)
            && (1..=16).contains(&self.index_ring_count)
            && (1..=16).contains(&self.detail_ring_count)
            && self.stack_capture_bytes <= MAX_STACK_CAPTURE_BYTES
            && self.detail_slot_size >= 24 + 64 + self.stack_capture_bytes;
        if !valid {
            return Err(FabricError::LayoutMismatch("config block out of bounds"));
        }
        Ok(FabricConfig {
            max_threads: self.max_threads,
            index_ring_bits: self.index_ring_bits as u8,
            index_ring_count: self.index_ring_count,
            detail_ring_bits: self.detail_ring_bits as u8,
            detail_ring_count: self.detail_ring_count,
            detail_slot_size: self.detail_slot_size,
            stack_capture_bytes: self.stack_capture_bytes,
        })
    }
}

/// Precomputed sizes and offsets for one session's arenas.
#[derive(Debug, Clone, Copy)]
pub struct FabricLayout {
    pub config: FabricConfig,
    pub index_lane: LaneGeometry,
    pub detail_lane: LaneGeometry,
}

impl FabricLayout {
    pub fn new(config: FabricConfig) -> Self {
        Self {
            config,
            index_lane: LaneGeometry {
                kind: LaneKind::Index,
                ring_count: config.index_ring_count,
                ring_capacity: config.index_ring_capacity(),
                event_size: INDEX_EVENT_SIZE as u32,
            },
            detail_lane: LaneGeometry {
                kind: LaneKind::Detail,
                ring_count: config.detail_ring_count,
                ring_capacity: config.detail_ring_capacity(),
                event_size: config.detail_slot_size,
            },
        }
    }

    /// Geometry for `kind`.
    #[inline]
    pub fn lane_geometry(&self, kind: LaneKind) -> &LaneGeometry {
        match kind {
            LaneKind::Index => &self.index_lane,
            LaneKind::Detail => &self.detail_lane,
        }
    }

    /// Registry block offset inside the control arena.
    #[inline]
    pub const fn registry_offset() -> usize {
        CONFIG_OFFSET + core::mem::size_of::<ConfigBlock>()
    }

    /// Total control arena size.
    pub fn control_bytes(&self) -> usize {
        Self::registry_offset() + bytes_for_registry(self.config.max_threads)
    }

    /// Total size of the lane arena for `kind`.
    pub fn lane_arena_bytes(&self, kind: LaneKind) -> usize {
        ARENA_HDR_SIZE
            + self.config.max_threads as usize * bytes_for_lane(self.lane_geometry(kind))
    }

    /// Offset of slot `slot`'s lane block inside its lane arena.
    pub fn lane_offset(&self, kind: LaneKind, slot: u32) -> usize {
        debug_assert!(slot < self.config.max_threads);
        ARENA_HDR_SIZE + slot as usize * bytes_for_lane(self.lane_geometry(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SMALL_FABRIC_CONFIG;

    #[test]
    fn offsets_are_disjoint_and_in_bounds() {
        let layout = FabricLayout::new(SMALL_FABRIC_CONFIG);
        let lane_bytes = bytes_for_lane(&layout.index_lane);
        let total = layout.lane_arena_bytes(LaneKind::Index);

        let mut prev_end = ARENA_HDR_SIZE;
        for slot in 0..layout.config.max_threads {
            let off = layout.lane_offset(LaneKind::Index, slot);
            assert_eq!(off, prev_end);
            prev_end = off + lane_bytes;
        }
        assert_eq!(prev_end, total);
    }

    #[test]
    fn config_block_roundtrip() {
        let mut mem = crate::test_util::AlignedBuf::new(core::mem::size_of::<ConfigBlock>());
        let block = unsafe { &mut *mem.as_mut_ptr().cast::<ConfigBlock>() };
        block.store(&SMALL_FABRIC_CONFIG);
        let back = block.load().unwrap();
        assert_eq!(back.max_threads, SMALL_FABRIC_CONFIG.max_threads);
        assert_eq!(back.detail_slot_size, SMALL_FABRIC_CONFIG.detail_slot_size);
    }

    #[test]
    fn corrupt_config_block_is_rejected() {
        let mut mem = crate::test_util::AlignedBuf::new(core::mem::size_of::<ConfigBlock>());
        let block = unsafe { &*mem.as_mut_ptr().cast::<ConfigBlock>() };
        assert!(block.load().is_err());
    }

    #[test]
    fn lane_geometries_follow_config() {
        let layout = FabricLayout::new(SMALL_FABRIC_CONFIG);
        assert_eq!(layout.index_lane.event_size, 32);
        assert_eq!(layout.index_lane.ring_count, SMALL_FABRIC_CONFIG.index_ring_count);
        assert_eq!(
            layout.detail_lane.event_size,
            SMALL_FABRIC_CONFIG.detail_slot_size
        );
    }
}
