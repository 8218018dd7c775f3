//! The session fabric: three arenas, one registry, per-slot lane pairs.
//!
//! The controller constructs the fabric (arenas created and fully
//! initialized, every slot's lane blocks laid out up front); the agent opens
//! it and validates before its first hook fires. Ring memory lives for the
//! whole session; registration only claims a pre-built slot.

use crate::arena::{ArenaRole, DirEntry, SharedArena};
use crate::config::FabricConfig;
use crate::error::FabricError;
use crate::layout::{ConfigBlock, FabricLayout, CONFIG_OFFSET};
use crate::pool::{LaneKind, LanePool};
use crate::registry::{RegistryView, ThreadSlot};

/// One thread's lane pair, materialized from its registry slot index.
pub struct ThreadLanes<'a> {
    slot_index: u32,
    slot: &'a ThreadSlot,
    index_base: *mut u8,
    detail_base: *mut u8,
}

impl<'a> ThreadLanes<'a> {
    /// Registry slot index these lanes belong to.
    #[inline]
    pub fn slot_index(&self) -> u32 {
        self.slot_index
    }

    /// The thread's registry slot (flags and thread-level counters).
    #[inline]
    pub fn slot(&self) -> &'a ThreadSlot {
        self.slot
    }

    /// Index-lane pool view.
    #[inline]
    pub fn index_pool(&self) -> LanePool<'a> {
        // SAFETY: the fabric initialized every lane block at construction.
        unsafe { LanePool::attach(self.index_base) }
    }

    /// Detail-lane pool view.
    #[inline]
    pub fn detail_pool(&self) -> LanePool<'a> {
        // SAFETY: as above.
        unsafe { LanePool::attach(self.detail_base) }
    }

    /// Pool view by lane kind.
    #[inline]
    pub fn pool(&self, kind: LaneKind) -> LanePool<'a> {
        match kind {
            LaneKind::Index => self.index_pool(),
            LaneKind::Detail => self.detail_pool(),
        }
    }
}

/// The mapped arena triple of one session.
#[derive(Debug)]
pub struct Fabric {
    layout: FabricLayout,
    control: SharedArena,
    index: SharedArena,
    detail: SharedArena,
}

impl Fabric {
    /// Creates and initializes a named fabric (controller side).
    pub fn create_named(
        config: FabricConfig,
        host_pid: u32,
        session_id: u64,
    ) -> Result<Self, FabricError> {
        let layout = FabricLayout::new(config);
        let control = SharedArena::create_named(
            ArenaRole::Control,
            host_pid,
            session_id,
            layout.control_bytes(),
        )?;
        let index = SharedArena::create_named(
            ArenaRole::Index,
            host_pid,
            session_id,
            layout.lane_arena_bytes(LaneKind::Index),
        )?;
        let detail = SharedArena::create_named(
            ArenaRole::Detail,
            host_pid,
            session_id,
            layout.lane_arena_bytes(LaneKind::Detail),
        )?;
        Ok(Self::initialize(layout, control, index, detail))
    }

    /// Creates an anonymous fabric with the same layout (single process:
    /// tests, benches).
    pub fn create_anonymous(config: FabricConfig) -> Result<Self, FabricError> {
        let layout = FabricLayout::new(config);
        let control = SharedArena::create_anonymous(ArenaRole::Control, layout.control_bytes())?;
        let index = SharedArena::create_anonymous(
            ArenaRole::Index,
            layout.lane_arena_bytes(LaneKind::Index),
        )?;
        let detail = SharedArena::create_anonymous(
            ArenaRole::Detail,
            layout.lane_arena_bytes(LaneKind::Detail),
        )?;
        Ok(Self::initialize(layout, control, index, detail))
    }

    fn initialize(
        layout: FabricLayout,
        mut control: SharedArena,
        index: SharedArena,
        detail: SharedArena,
    ) -> Self {
        let dir = control.directory_mut();
        dir.entries[0] = DirEntry::new(ArenaRole::Control, layout.control_bytes() as u64);
        dir.entries[1] = DirEntry::new(
            ArenaRole::Index,
            layout.lane_arena_bytes(LaneKind::Index) as u64,
        );
        dir.entries[2] = DirEntry::new(
            ArenaRole::Detail,
            layout.lane_arena_bytes(LaneKind::Detail) as u64,
        );

        // SAFETY: the control arena is sized for the config block at its
        // fixed offset and is exclusively ours during construction.
        unsafe {
            let block = &mut *control.base().add(CONFIG_OFFSET).cast::<ConfigBlock>();
            block.store(&layout.config);
            RegistryView::create(
                control.base().add(FabricLayout::registry_offset()),
                layout.config.max_threads,
            );
        }

        for slot in 0..layout.config.max_threads {
            // SAFETY: lane offsets are within the arena by layout
            // construction; each block is created exactly once.
            unsafe {
                LanePool::create(
                    index.base().add(layout.lane_offset(LaneKind::Index, slot)),
                    &layout.index_lane,
                );
                LanePool::create(
                    detail.base().add(layout.lane_offset(LaneKind::Detail, slot)),
                    &layout.detail_lane,
                );
            }
        }

        tracing::info!(
            max_threads = layout.config.max_threads,
            control_bytes = layout.control_bytes(),
            index_bytes = layout.lane_arena_bytes(LaneKind::Index),
            detail_bytes = layout.lane_arena_bytes(LaneKind::Detail),
            "fabric initialized"
        );

        Self {
            layout,
            control,
            index,
            detail,
        }
    }

    /// Opens an existing named fabric (agent side): validates the control
    /// arena, reads the geometry back, then maps the siblings listed in the
    /// directory.
    pub fn open_named(host_pid: u32, session_id: u64) -> Result<Self, FabricError> {
        let control = SharedArena::open_named(ArenaRole::Control, host_pid, session_id)?;
        if control.len() < FabricLayout::registry_offset() {
            return Err(FabricError::LayoutMismatch("control arena truncated"));
        }

        // SAFETY: the length check above covers the config block.
        let config = unsafe { &*control.base().add(CONFIG_OFFSET).cast::<ConfigBlock>() }.load()?;
        let layout = FabricLayout::new(config);
        if control.len() < layout.control_bytes() {
            return Err(FabricError::LayoutMismatch("control arena too small"));
        }

        let index = SharedArena::open_named(ArenaRole::Index, host_pid, session_id)?;
        let detail = SharedArena::open_named(ArenaRole::Detail, host_pid, session_id)?;
        let dir = control.directory();
        for (arena, role) in [(&index, ArenaRole::Index), (&detail, ArenaRole::Detail)] {
            let expected = layout.lane_arena_bytes(match role {
                ArenaRole::Index => LaneKind::Index,
                _ => LaneKind::Detail,
            }) as u64;
            if dir.size_of(role) != Some(expected) || (arena.len() as u64) < expected {
                return Err(FabricError::LayoutMismatch("lane arena size mismatch"));
            }
        }

        Ok(Self {
            layout,
            control,
            index,
            detail,
        })
    }

    /// Fabric geometry.
    #[inline]
    pub fn layout(&self) -> &FabricLayout {
        &self.layout
    }

    /// Session configuration.
    #[inline]
    pub fn config(&self) -> &FabricConfig {
        &self.layout.config
    }

    /// Materializes the registry view.
    #[inline]
    pub fn registry(&self) -> RegistryView<'_> {
        // SAFETY: initialized during fabric construction (or validated by
        // `open_named`).
        unsafe {
            RegistryView::attach(self.control.base().add(FabricLayout::registry_offset()))
        }
    }

    /// Materializes slot `slot`'s lane pair.
    pub fn lanes(&self, slot: u32) -> ThreadLanes<'_> {
        assert!(slot < self.layout.config.max_threads);
        ThreadLanes {
            slot_index: slot,
            slot: self.registry().slot(slot),
            // SAFETY: offsets bounded by the arena sizes for any valid slot.
            index_base: unsafe {
                self.index
                    .base()
                    .add(self.layout.lane_offset(LaneKind::Index, slot))
            },
            detail_base: unsafe {
                self.detail
                    .base()
                    .add(self.layout.lane_offset(LaneKind::Detail, slot))
            },
        }
    }
}

// SAFETY: the arenas are Send + Sync; which thread may use which view is
// governed by the lane SPSC roles, not by this type.
unsafe impl Send for Fabric {}
unsafe impl Sync for Fabric {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SMALL_FABRIC_CONFIG;
    use crate::pool::WriteOutcome;

    #[test]
    fn anonymous_fabric_has_working_lanes() {
        let fabric = Fabric::create_anonymous(SMALL_FABRIC_CONFIG).unwrap();
        let slot = fabric.registry().register(4242).unwrap();
        let lanes = fabric.lanes(slot);

        let rec = [7u8; 32];
        assert_eq!(lanes.index_pool().write_record(&rec), WriteOutcome::Written);
        assert_eq!(lanes.index_pool().counters().snapshot().events_written, 1);
        assert_eq!(lanes.detail_pool().kind(), LaneKind::Detail);
    }

    #[test]
    fn every_slot_lane_is_initialized() {
        let fabric = Fabric::create_anonymous(SMALL_FABRIC_CONFIG).unwrap();
        for slot in 0..SMALL_FABRIC_CONFIG.max_threads {
            let lanes = fabric.lanes(slot);
            assert_eq!(
                lanes.index_pool().ring_count(),
                SMALL_FABRIC_CONFIG.index_ring_count
            );
            assert_eq!(lanes.index_pool().active_index(), 0);
            assert!(lanes.detail_pool().take_submitted().is_none());
        }
    }

    #[test]
    fn named_fabric_cross_open() {
        let pid = std::process::id();
        let sid = u64::from(pid) ^ 0xFAB0;
        let Ok(created) = Fabric::create_named(SMALL_FABRIC_CONFIG, pid, sid) else {
            // No usable /dev/shm in this environment.
            return;
        };

        let opened = Fabric::open_named(pid, sid).unwrap();
        let slot = created.registry().register(77).unwrap();
        // The opener sees the same registry state through its own mapping.
        assert_eq!(opened.registry().find(77), Some(slot));
        drop(opened);
        drop(created);
    }
}
