//! Named shared-memory arenas.
//!
//! The controller creates each arena with `shm_open(O_CREAT | O_EXCL)`, sizes
//! it, maps it, and writes the header; the agent opens the same name and
//! validates magic, version, and role before touching the payload. A
//! mismatch aborts agent initialization and the agent hooks nothing.
//!
//! All cross-process references inside an arena are byte offsets from the
//! arena base; views over them are materialized per call. Anonymous arenas
//! provide the same layout within a single process for tests and benches.

use crate::error::FabricError;
use memmap2::MmapMut;
use std::fs::File;
use std::os::unix::io::FromRawFd;

/// Arena magic: ASCII "ADATRACE".
pub const ARENA_MAGIC: u64 = 0x4144_4154_5241_4345;

/// Bump on any incompatible layout change; openers reject mismatches.
pub const ARENA_VERSION: u32 = 1;

/// Which arena of the session triple this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ArenaRole {
    /// Directory, flags, thread registry.
    Control = 1,
    /// Per-thread index lanes.
    Index = 2,
    /// Per-thread detail lanes.
    Detail = 3,
}

impl ArenaRole {
    /// Name component used in the shared-memory object name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Control => "control",
            Self::Index => "index",
            Self::Detail => "detail",
        }
    }
}

/// Shared-memory object name for `(role, host_pid, session_id)`.
pub fn arena_name(role: ArenaRole, host_pid: u32, session_id: u64) -> String {
    format!("ada.{}.{}.{:x}", role.as_str(), host_pid, session_id)
}

/// 64-byte header at offset 0 of every arena.
#[repr(C, align(64))]
pub struct ArenaHdr {
    magic: u64,
    version: u32,
    role: u32,
    total_size: u64,
    host_pid: u32,
    _pad0: u32,
    session_id: u64,
    _pad1: [u8; 24],
}

const _: () = assert!(core::mem::size_of::<ArenaHdr>() == crate::layout::ARENA_HDR_SIZE);

impl ArenaHdr {
    fn validate(&self, role: ArenaRole) -> Result<(), FabricError> {
        if self.magic != ARENA_MAGIC {
            return Err(FabricError::LayoutMismatch("bad arena magic"));
        }
        if self.version != ARENA_VERSION {
            return Err(FabricError::LayoutMismatch("arena version mismatch"));
        }
        if self.role != role as u32 {
            return Err(FabricError::LayoutMismatch("arena role mismatch"));
        }
        Ok(())
    }
}

/// Directory entry in the control arena: size of one sibling arena.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DirEntry {
    pub role: u32,
    _pad: u32,
    pub size: u64,
}

impl DirEntry {
    pub fn new(role: ArenaRole, size: u64) -> Self {
        Self {
            role: role as u32,
            _pad: 0,
            size,
        }
    }
}

/// Directory block at offset 64 of the control arena. Lets the agent map the
/// sibling arenas without re-deriving their sizes.
#[repr(C, align(64))]
pub struct ArenaDirectory {
    pub entries: [DirEntry; 3],
    _pad: [u8; 16],
}

const _: () = assert!(core::mem::size_of::<ArenaDirectory>() == crate::layout::DIRECTORY_SIZE);

impl ArenaDirectory {
    /// Size recorded for `role`, if present.
    pub fn size_of(&self, role: ArenaRole) -> Option<u64> {
        self.entries
            .iter()
            .find(|e| e.role == role as u32)
            .map(|e| e.size)
    }
}

#[derive(Debug)]
enum Backing {
    Named { name: String, owned: bool },
    Anonymous,
}

/// One mapped arena. Creator or opener keeps it alive for the session; every
/// structure view borrows from it.
#[derive(Debug)]
pub struct SharedArena {
    map: MmapMut,
    role: ArenaRole,
    backing: Backing,
}

impl SharedArena {
    /// Creates and maps a named arena (controller side).
    pub fn create_named(
        role: ArenaRole,
        host_pid: u32,
        session_id: u64,
        size: usize,
    ) -> Result<Self, FabricError> {
        let name = arena_name(role, host_pid, session_id);
        let file = shm_file(&name, true).map_err(|source| FabricError::ShmOpenFailed {
            name: name.clone(),
            source,
        })?;
        file.set_len(size as u64)
            .map_err(|source| FabricError::ShmOpenFailed {
                name: name.clone(),
                source,
            })?;
        // SAFETY: the object was just created with O_EXCL; no other mapping
        // of it exists yet.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| {
            FabricError::ShmOpenFailed {
                name: name.clone(),
                source,
            }
        })?;
        let mut arena = Self {
            map,
            role,
            backing: Backing::Named { name, owned: true },
        };
        arena.write_header(host_pid, session_id);
        Ok(arena)
    }

    /// Opens and maps an existing named arena (agent side) and validates its
    /// header.
    pub fn open_named(
        role: ArenaRole,
        host_pid: u32,
        session_id: u64,
    ) -> Result<Self, FabricError> {
        let name = arena_name(role, host_pid, session_id);
        let file = shm_file(&name, false).map_err(|source| FabricError::ShmOpenFailed {
            name: name.clone(),
            source,
        })?;
        // SAFETY: mapping shared memory both processes mutate is the point;
        // the in-arena protocols provide the synchronization.
        let map = unsafe { MmapMut::map_mut(&file) }.map_err(|source| {
            FabricError::ShmOpenFailed {
                name: name.clone(),
                source,
            }
        })?;
        let arena = Self {
            map,
            role,
            backing: Backing::Named { name, owned: false },
        };
        arena.header().validate(role)?;
        Ok(arena)
    }

    /// Creates an anonymous arena with the same layout (tests, benches).
    pub fn create_anonymous(role: ArenaRole, size: usize) -> Result<Self, FabricError> {
        let map = MmapMut::map_anon(size).map_err(|source| FabricError::ShmOpenFailed {
            name: format!("<anonymous {}>", role.as_str()),
            source,
        })?;
        let mut arena = Self {
            map,
            role,
            backing: Backing::Anonymous,
        };
        arena.write_header(std::process::id(), 0);
        Ok(arena)
    }

    fn write_header(&mut self, host_pid: u32, session_id: u64) {
        let total_size = self.map.len() as u64;
        // SAFETY: the mapping is at least header-sized and exclusively ours
        // during construction.
        let hdr = unsafe { &mut *self.map.as_mut_ptr().cast::<ArenaHdr>() };
        hdr.magic = ARENA_MAGIC;
        hdr.version = ARENA_VERSION;
        hdr.role = self.role as u32;
        hdr.total_size = total_size;
        hdr.host_pid = host_pid;
        hdr.session_id = session_id;
    }

    fn header(&self) -> &ArenaHdr {
        // SAFETY: every constructor maps at least a header.
        unsafe { &*self.map.as_ptr().cast::<ArenaHdr>() }
    }

    /// Writable directory block (control arena only).
    pub fn directory_mut(&mut self) -> &mut ArenaDirectory {
        debug_assert_eq!(self.role, ArenaRole::Control);
        // SAFETY: the control arena is laid out with the directory at the
        // fixed offset right after the header.
        unsafe {
            &mut *self
                .map
                .as_mut_ptr()
                .add(crate::layout::ARENA_HDR_SIZE)
                .cast::<ArenaDirectory>()
        }
    }

    /// Directory block (control arena only).
    pub fn directory(&self) -> &ArenaDirectory {
        debug_assert_eq!(self.role, ArenaRole::Control);
        // SAFETY: as in `directory_mut`.
        unsafe {
            &*self
                .map
                .as_ptr()
                .add(crate::layout::ARENA_HDR_SIZE)
                .cast::<ArenaDirectory>()
        }
    }

    /// Arena base pointer. Structure views are materialized from
    /// `base() + offset` per call and must not outlive the arena.
    #[inline]
    pub fn base(&self) -> *mut u8 {
        self.map.as_ptr().cast_mut()
    }

    /// Mapped length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the mapping is zero-sized (never the case for a
    /// successfully constructed arena).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }

    #[inline]
    pub fn role(&self) -> ArenaRole {
        self.role
    }
}

impl Drop for SharedArena {
    fn drop(&mut self) {
        if let Backing::Named { name, owned: true } = &self.backing {
            let _ = shm_unlink(name);
        }
    }
}

// SAFETY: the mapping is plain shared memory; which threads may touch which
// regions is governed by the SPSC protocols layered on top.
unsafe impl Send for SharedArena {}
unsafe impl Sync for SharedArena {}

fn shm_file(name: &str, create: bool) -> std::io::Result<File> {
    let c_name = std::ffi::CString::new(format!("/{name}"))
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    let flags = if create {
        libc::O_CREAT | libc::O_EXCL | libc::O_RDWR
    } else {
        libc::O_RDWR
    };
    // SAFETY: c_name is a valid NUL-terminated string.
    let fd = unsafe { libc::shm_open(c_name.as_ptr(), flags, 0o600 as libc::mode_t) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: fd is a freshly opened descriptor we own.
    Ok(unsafe { File::from_raw_fd(fd) })
}

fn shm_unlink(name: &str) -> std::io::Result<()> {
    let c_name = std::ffi::CString::new(format!("/{name}"))
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    // SAFETY: c_name is a valid NUL-terminated string.
    if unsafe { libc::shm_unlink(c_name.as_ptr()) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}
