//! Bit-exact .atf trace file layout.
//!
//! Both files of a thread share the same shape: a 64-byte header, a
//! contiguous event stream, and a 64-byte footer whose magic is the header's
//! reversed. All fields are little-endian and sequentially packed at the
//! offsets given next to each field; nothing here depends on Rust struct
//! layout.
//!
//! ```text
//! index.atf                          detail.atf
//! [0..64)   header  "ATI2"           [0..64)  header  "ATD2"
//! [64..N)   32-byte IndexEvent × n   [64..N)  length-prefixed records
//! [N..N+64) footer  "2ITA"           [N..N+64) footer "2DTA"
//! ```

use thiserror::Error;

/// Header and footer are each exactly this size.
pub const FILE_HEADER_SIZE: usize = 64;
pub const FILE_FOOTER_SIZE: usize = 64;

pub const INDEX_HEADER_MAGIC: [u8; 4] = *b"ATI2";
pub const INDEX_FOOTER_MAGIC: [u8; 4] = *b"2ITA";
pub const DETAIL_HEADER_MAGIC: [u8; 4] = *b"ATD2";
pub const DETAIL_FOOTER_MAGIC: [u8; 4] = *b"2DTA";

/// Little-endian marker byte.
pub const ENDIAN_LITTLE: u8 = 0x01;

/// Current format version.
pub const FORMAT_VERSION: u8 = 1;

/// `clock_type`: monotonic nanoseconds.
pub const CLOCK_MONOTONIC_NS: u8 = 1;

/// Index-header flag: a detail file exists for this thread.
pub const FLAG_HAS_DETAIL_FILE: u16 = 1;

/// Architecture byte for the current build.
pub const fn current_arch() -> u8 {
    if cfg!(target_arch = "x86_64") {
        1
    } else if cfg!(target_arch = "aarch64") {
        2
    } else {
        0
    }
}

/// OS byte for the current build.
pub const fn current_os() -> u8 {
    if cfg!(target_os = "linux") {
        1
    } else if cfg!(target_os = "macos") {
        2
    } else {
        0
    }
}

/// Malformed or mismatched file structure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic in {0}")]
    BadMagic(&'static str),
    #[error("unsupported {what}: {value}")]
    Unsupported { what: &'static str, value: u32 },
}

// ---------------------------------------------------------------------
// INDEX FILE
// ---------------------------------------------------------------------

/// Index file header. `event_count`, `footer_offset`, and the time range
/// are zero until finalize rewrites the header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexFileHeader {
    pub flags: u16,
    pub thread_id: u32,
    pub event_count: u32,
    pub footer_offset: u32,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
}

impl IndexFileHeader {
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&INDEX_HEADER_MAGIC);
        buf[4] = ENDIAN_LITTLE;
        buf[5] = FORMAT_VERSION;
        buf[6] = current_arch();
        buf[7] = current_os();
        buf[8..10].copy_from_slice(&self.flags.to_le_bytes());
        buf[10..14].copy_from_slice(&self.thread_id.to_le_bytes());
        buf[14] = CLOCK_MONOTONIC_NS;
        // [15..22) reserved
        buf[22..26].copy_from_slice(&32u32.to_le_bytes()); // event_size
        buf[26..30].copy_from_slice(&self.event_count.to_le_bytes());
        buf[30..34].copy_from_slice(&(FILE_HEADER_SIZE as u32).to_le_bytes()); // events_offset
        buf[34..38].copy_from_slice(&self.footer_offset.to_le_bytes());
        buf[38..46].copy_from_slice(&self.time_start_ns.to_le_bytes());
        buf[46..54].copy_from_slice(&self.time_end_ns.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; FILE_HEADER_SIZE]) -> Result<Self, FormatError> {
        if buf[0..4] != INDEX_HEADER_MAGIC {
            return Err(FormatError::BadMagic("index header"));
        }
        if buf[5] != FORMAT_VERSION {
            return Err(FormatError::Unsupported {
                what: "index version",
                value: u32::from(buf[5]),
            });
        }
        let event_size = u32::from_le_bytes(buf[22..26].try_into().unwrap());
        if event_size != 32 {
            return Err(FormatError::Unsupported {
                what: "index event size",
                value: event_size,
            });
        }
        Ok(Self {
            flags: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            thread_id: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
            event_count: u32::from_le_bytes(buf[26..30].try_into().unwrap()),
            footer_offset: u32::from_le_bytes(buf[34..38].try_into().unwrap()),
            time_start_ns: u64::from_le_bytes(buf[38..46].try_into().unwrap()),
            time_end_ns: u64::from_le_bytes(buf[46..54].try_into().unwrap()),
        })
    }
}

/// Index file footer. `checksum` is reserved and written as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexFileFooter {
    pub event_count: u32,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
    pub bytes_written: u64,
}

impl IndexFileFooter {
    pub fn encode(&self) -> [u8; FILE_FOOTER_SIZE] {
        let mut buf = [0u8; FILE_FOOTER_SIZE];
        buf[0..4].copy_from_slice(&INDEX_FOOTER_MAGIC);
        // [4..8) checksum, reserved as zero
        buf[8..12].copy_from_slice(&self.event_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.time_start_ns.to_le_bytes());
        buf[20..28].copy_from_slice(&self.time_end_ns.to_le_bytes());
        buf[28..36].copy_from_slice(&self.bytes_written.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; FILE_FOOTER_SIZE]) -> Result<Self, FormatError> {
        if buf[0..4] != INDEX_FOOTER_MAGIC {
            return Err(FormatError::BadMagic("index footer"));
        }
        Ok(Self {
            event_count: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            time_start_ns: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            time_end_ns: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            bytes_written: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
        })
    }
}

// ---------------------------------------------------------------------
// DETAIL FILE
// ---------------------------------------------------------------------

/// Detail file header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailFileHeader {
    pub flags: u16,
    pub thread_id: u32,
    pub event_count: u32,
    pub bytes_length: u64,
    pub index_seq_start: u32,
    pub index_seq_end: u32,
}

impl DetailFileHeader {
    pub fn encode(&self) -> [u8; FILE_HEADER_SIZE] {
        let mut buf = [0u8; FILE_HEADER_SIZE];
        buf[0..4].copy_from_slice(&DETAIL_HEADER_MAGIC);
        buf[4] = ENDIAN_LITTLE;
        buf[5] = FORMAT_VERSION;
        buf[6] = current_arch();
        buf[7] = current_os();
        buf[8..10].copy_from_slice(&self.flags.to_le_bytes());
        buf[10..14].copy_from_slice(&self.thread_id.to_le_bytes());
        buf[14..18].copy_from_slice(&(FILE_HEADER_SIZE as u32).to_le_bytes()); // events_offset
        buf[18..22].copy_from_slice(&self.event_count.to_le_bytes());
        buf[22..30].copy_from_slice(&self.bytes_length.to_le_bytes());
        buf[30..34].copy_from_slice(&self.index_seq_start.to_le_bytes());
        buf[34..38].copy_from_slice(&self.index_seq_end.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; FILE_HEADER_SIZE]) -> Result<Self, FormatError> {
        if buf[0..4] != DETAIL_HEADER_MAGIC {
            return Err(FormatError::BadMagic("detail header"));
        }
        if buf[5] != FORMAT_VERSION {
            return Err(FormatError::Unsupported {
                what: "detail version",
                value: u32::from(buf[5]),
            });
        }
        Ok(Self {
            flags: u16::from_le_bytes(buf[8..10].try_into().unwrap()),
            thread_id: u32::from_le_bytes(buf[10..14].try_into().unwrap()),
            event_count: u32::from_le_bytes(buf[18..22].try_into().unwrap()),
            bytes_length: u64::from_le_bytes(buf[22..30].try_into().unwrap()),
            index_seq_start: u32::from_le_bytes(buf[30..34].try_into().unwrap()),
            index_seq_end: u32::from_le_bytes(buf[34..38].try_into().unwrap()),
        })
    }
}

/// Detail file footer. `checksum` is reserved and written as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetailFileFooter {
    pub event_count: u32,
    pub bytes_length: u64,
    pub time_start_ns: u64,
    pub time_end_ns: u64,
}

impl DetailFileFooter {
    pub fn encode(&self) -> [u8; FILE_FOOTER_SIZE] {
        let mut buf = [0u8; FILE_FOOTER_SIZE];
        buf[0..4].copy_from_slice(&DETAIL_FOOTER_MAGIC);
        // [4..8) checksum, reserved as zero
        buf[8..12].copy_from_slice(&self.event_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.bytes_length.to_le_bytes());
        buf[20..28].copy_from_slice(&self.time_start_ns.to_le_bytes());
        buf[28..36].copy_from_slice(&self.time_end_ns.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8; FILE_FOOTER_SIZE]) -> Result<Self, FormatError> {
        if buf[0..4] != DETAIL_FOOTER_MAGIC {
            return Err(FormatError::BadMagic("detail footer"));
        }
        Ok(Self {
            event_count: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            bytes_length: u64::from_le_bytes(buf[12..20].try_into().unwrap()),
            time_start_ns: u64::from_le_bytes(buf[20..28].try_into().unwrap()),
            time_end_ns: u64::from_le_bytes(buf[28..36].try_into().unwrap()),
        })
    }
}
