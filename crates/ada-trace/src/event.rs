//! Wire records shared between the agent, the drain, and the trace files.
//!
//! Records travel through the rings already in their on-disk little-endian
//! form, so the drain appends ring contents to the trace files without
//! re-encoding. Both record types have a fixed width that is asserted at
//! compile time:
//!
//! - [`IndexEvent`] is exactly 32 bytes.
//! - [`DetailEventHeader`] is exactly 24 bytes; the payload (register block,
//!   optional stack window) follows it inside the detail ring slot, with
//!   `total_length` covering header plus payload.

/// Sentinel in `IndexEvent::detail_seq`: no detail record was reserved.
pub const NO_DETAIL: u32 = u32::MAX;

/// Width of an index record in rings and in `index.atf`.
pub const INDEX_EVENT_SIZE: usize = 32;

/// Width of the detail record header.
pub const DETAIL_HEADER_SIZE: usize = 24;

/// Kind of an index event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum EventKind {
    /// Function entry.
    Call = 1,
    /// Function exit.
    Return = 2,
    /// Unwound past the hook (exception propagation).
    Exception = 3,
}

impl EventKind {
    /// Decodes a raw kind, if valid.
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            1 => Some(Self::Call),
            2 => Some(Self::Return),
            3 => Some(Self::Exception),
            _ => None,
        }
    }
}

/// Type tag of a detail record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum DetailEventType {
    /// Argument-register capture at entry.
    FunctionCall = 3,
    /// Return-register capture at exit.
    FunctionReturn = 4,
}

/// Flag bits in `DetailEventHeader::flags`.
///
/// The low byte carries the number of 8-byte register slots in the payload;
/// the bits above it are boolean flags.
pub mod detail_flags {
    /// A stack window follows the register block.
    pub const HAS_STACK: u16 = 1 << 8;

    /// Number of `u64` register slots encoded in the low byte.
    #[inline]
    pub fn register_count(flags: u16) -> usize {
        (flags & 0xFF) as usize
    }

    /// Builds a flags word from a register count and stack presence.
    #[inline]
    pub fn pack(register_slots: u16, has_stack: bool) -> u16 {
        debug_assert!(register_slots <= 0xFF);
        register_slots | if has_stack { HAS_STACK } else { 0 }
    }
}

/// Fixed 32-byte index record. One per hook enter/leave.
///
/// `function_id` packs the module id in the upper 32 bits and the per-module
/// symbol ordinal in the lower 32. `detail_seq` is [`NO_DETAIL`] unless a
/// detail record was reserved for the same invocation.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEvent {
    pub timestamp_ns: u64,
    pub function_id: u64,
    pub thread_id: u32,
    pub event_kind: u32,
    pub call_depth: u32,
    pub detail_seq: u32,
}

const _: () = assert!(core::mem::size_of::<IndexEvent>() == INDEX_EVENT_SIZE);

impl IndexEvent {
    /// Serializes into the on-disk little-endian layout.
    #[inline]
    pub fn write_to(&self, out: &mut [u8; INDEX_EVENT_SIZE]) {
        out[0..8].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        out[8..16].copy_from_slice(&self.function_id.to_le_bytes());
        out[16..20].copy_from_slice(&self.thread_id.to_le_bytes());
        out[20..24].copy_from_slice(&self.event_kind.to_le_bytes());
        out[24..28].copy_from_slice(&self.call_depth.to_le_bytes());
        out[28..32].copy_from_slice(&self.detail_seq.to_le_bytes());
    }

    /// Deserializes from the on-disk layout.
    #[inline]
    pub fn read_from(buf: &[u8; INDEX_EVENT_SIZE]) -> Self {
        Self {
            timestamp_ns: u64::from_le_bytes(buf[0..8].try_into().unwrap()),
            function_id: u64::from_le_bytes(buf[8..16].try_into().unwrap()),
            thread_id: u32::from_le_bytes(buf[16..20].try_into().unwrap()),
            event_kind: u32::from_le_bytes(buf[20..24].try_into().unwrap()),
            call_depth: u32::from_le_bytes(buf[24..28].try_into().unwrap()),
            detail_seq: u32::from_le_bytes(buf[28..32].try_into().unwrap()),
        }
    }
}

/// Fixed 24-byte header of a detail record.
///
/// `index_seq` is the backward link: the ordinal of the index event this
/// record belongs to. `total_length` covers this header and the payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetailEventHeader {
    pub total_length: u32,
    pub event_type: u16,
    pub flags: u16,
    pub index_seq: u32,
    pub thread_id: u32,
    pub timestamp: u64,
}

const _: () = assert!(core::mem::size_of::<DetailEventHeader>() == DETAIL_HEADER_SIZE);

impl DetailEventHeader {
    /// Serializes into the on-disk little-endian layout.
    #[inline]
    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= DETAIL_HEADER_SIZE);
        out[0..4].copy_from_slice(&self.total_length.to_le_bytes());
        out[4..6].copy_from_slice(&self.event_type.to_le_bytes());
        out[6..8].copy_from_slice(&self.flags.to_le_bytes());
        out[8..12].copy_from_slice(&self.index_seq.to_le_bytes());
        out[12..16].copy_from_slice(&self.thread_id.to_le_bytes());
        out[16..24].copy_from_slice(&self.timestamp.to_le_bytes());
    }

    /// Deserializes from the on-disk layout.
    #[inline]
    pub fn read_from(buf: &[u8]) -> Self {
        debug_assert!(buf.len() >= DETAIL_HEADER_SIZE);
        Self {
            total_length: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            event_type: u16::from_le_bytes(buf[4..6].try_into().unwrap()),
            flags: u16::from_le_bytes(buf[6..8].try_into().unwrap()),
            index_seq: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            thread_id: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
            timestamp: u64::from_le_bytes(buf[16..24].try_into().unwrap()),
        }
    }
}

/// Builds a 64-bit function id from a module id and a symbol ordinal.
#[inline]
pub const fn make_function_id(module_id: u32, ordinal: u32) -> u64 {
    ((module_id as u64) << 32) | ordinal as u64
}

/// Module-id half of a function id.
#[inline]
pub const fn function_module_id(function_id: u64) -> u32 {
    (function_id >> 32) as u32
}

/// Ordinal half of a function id.
#[inline]
pub const fn function_ordinal(function_id: u64) -> u32 {
    function_id as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_event_roundtrip() {
        let ev = IndexEvent {
            timestamp_ns: 0x0102_0304_0506_0708,
            function_id: make_function_id(0xDEAD_BEEF, 7),
            thread_id: 42,
            event_kind: EventKind::Call as u32,
            call_depth: 3,
            detail_seq: NO_DETAIL,
        };
        let mut buf = [0u8; INDEX_EVENT_SIZE];
        ev.write_to(&mut buf);
        assert_eq!(IndexEvent::read_from(&buf), ev);
        // Field offsets are part of the file format.
        assert_eq!(&buf[0..8], &0x0102_0304_0506_0708u64.to_le_bytes());
        assert_eq!(&buf[28..32], &u32::MAX.to_le_bytes());
    }

    #[test]
    fn detail_header_roundtrip() {
        let hdr = DetailEventHeader {
            total_length: 24 + 64 + 128,
            event_type: DetailEventType::FunctionCall as u16,
            flags: detail_flags::pack(8, true),
            index_seq: 12,
            thread_id: 9,
            timestamp: 1_000_000,
        };
        let mut buf = [0u8; 64];
        hdr.write_to(&mut buf);
        let back = DetailEventHeader::read_from(&buf);
        assert_eq!(back, hdr);
        assert_eq!(detail_flags::register_count(back.flags), 8);
        assert!(back.flags & detail_flags::HAS_STACK != 0);
    }

    #[test]
    fn function_id_packing() {
        let fid = make_function_id(0x1234_5678, 0x9ABC_DEF0);
        assert_eq!(function_module_id(fid), 0x1234_5678);
        assert_eq!(function_ordinal(fid), 0x9ABC_DEF0);
    }
}
