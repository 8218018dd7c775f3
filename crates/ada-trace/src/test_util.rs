//! Test-only aligned scratch regions.
//!
//! Real arenas are page-aligned mappings; unit tests that exercise a single
//! structure get an equivalent 64-byte-aligned heap region from here.

use std::alloc::{alloc_zeroed, dealloc, Layout};

pub(crate) struct AlignedBuf {
    ptr: *mut u8,
    layout: Layout,
}

impl AlignedBuf {
    pub(crate) fn new(size: usize) -> Self {
        let layout = Layout::from_size_align(size.max(64), 64).unwrap();
        // SAFETY: layout has nonzero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        assert!(!ptr.is_null());
        Self { ptr, layout }
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr
    }
}

impl Drop for AlignedBuf {
    fn drop(&mut self) {
        // SAFETY: allocated with this exact layout in `new`.
        unsafe { dealloc(self.ptr, self.layout) };
    }
}
