//! Per-thread trace writer.
//!
//! One writer per traced thread, owned by the drain thread, so there is never
//! contention on writer state. `index.atf` is created with the thread's
//! directory; `detail.atf` only comes into existence on the first detail
//! record (most threads never produce one). Append errors are counted and
//! swallowed so one sick file cannot stall the drain; `finalize` reports
//! them.

use crate::format::{
    DetailFileFooter, DetailFileHeader, IndexFileFooter, IndexFileHeader, FLAG_HAS_DETAIL_FILE,
};
use ada_trace::{DetailEventHeader, DETAIL_HEADER_SIZE, INDEX_EVENT_SIZE};
use std::fs::{self, File};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Incrementally tracked `(first, last)` timestamp pair.
#[derive(Debug, Default, Clone, Copy)]
struct TimeRange {
    start_ns: u64,
    end_ns: u64,
    seen: bool,
}

impl TimeRange {
    fn note(&mut self, timestamp_ns: u64) {
        if !self.seen {
            self.start_ns = timestamp_ns;
            self.seen = true;
        }
        self.end_ns = timestamp_ns;
    }
}

/// Writer for one thread's `index.atf` and (lazily) `detail.atf`.
pub struct ThreadTraceWriter {
    dir: PathBuf,
    thread_id: u32,
    index: File,
    detail: Option<File>,
    index_count: u32,
    index_times: TimeRange,
    detail_count: u32,
    detail_bytes: u64,
    detail_times: TimeRange,
    detail_seq_range: Option<(u32, u32)>,
    write_failures: u64,
    finalized: bool,
}

impl ThreadTraceWriter {
    /// Creates `<session_dir>/thread_<tid>/index.atf` with a placeholder
    /// header. The detail file is not created here.
    pub fn create(session_dir: &Path, thread_id: u32) -> io::Result<Self> {
        let dir = session_dir.join(format!("thread_{thread_id}"));
        fs::create_dir_all(&dir)?;

        let mut index = File::create(dir.join("index.atf"))?;
        let header = IndexFileHeader {
            thread_id,
            ..IndexFileHeader::default()
        };
        index.write_all(&header.encode())?;

        Ok(Self {
            dir,
            thread_id,
            index,
            detail: None,
            index_count: 0,
            index_times: TimeRange::default(),
            detail_count: 0,
            detail_bytes: 0,
            detail_times: TimeRange::default(),
            detail_seq_range: None,
            write_failures: 0,
            finalized: false,
        })
    }

    /// Thread this writer belongs to.
    #[inline]
    pub fn thread_id(&self) -> u32 {
        self.thread_id
    }

    /// Index events appended so far. This is the canonical captured-event
    /// count: what actually reached the file.
    #[inline]
    pub fn index_event_count(&self) -> u32 {
        self.index_count
    }

    /// Detail records appended so far.
    #[inline]
    pub fn detail_event_count(&self) -> u32 {
        self.detail_count
    }

    /// Append errors swallowed so far.
    #[inline]
    pub fn write_failures(&self) -> u64 {
        self.write_failures
    }

    /// Total bytes the finalized index file will occupy.
    pub fn index_file_bytes(&self) -> u64 {
        64 + u64::from(self.index_count) * INDEX_EVENT_SIZE as u64 + 64
    }

    /// Appends a batch of 32-byte index records.
    ///
    /// `records` must be a whole number of records. I/O errors are counted,
    /// not returned.
    pub fn append_index(&mut self, records: &[u8]) {
        debug_assert_eq!(records.len() % INDEX_EVENT_SIZE, 0);
        if records.is_empty() {
            return;
        }
        if let Err(err) = self.index.write_all(records) {
            self.write_failures += 1;
            tracing::warn!(thread_id = self.thread_id, error = %err, "index append failed");
            return;
        }
        for rec in records.chunks_exact(INDEX_EVENT_SIZE) {
            let ts = u64::from_le_bytes(rec[0..8].try_into().unwrap());
            self.index_times.note(ts);
            self.index_count += 1;
        }
    }

    /// Appends one detail record (24-byte header plus payload), creating the
    /// detail file on first use.
    pub fn append_detail(&mut self, record: &[u8]) {
        debug_assert!(record.len() >= DETAIL_HEADER_SIZE);
        let header = DetailEventHeader::read_from(record);
        debug_assert_eq!(header.total_length as usize, record.len());

        if self.detail.is_none() {
            match self.create_detail_file() {
                Ok(file) => self.detail = Some(file),
                Err(err) => {
                    self.write_failures += 1;
                    tracing::warn!(thread_id = self.thread_id, error = %err, "detail create failed");
                    return;
                }
            }
        }

        let Some(file) = self.detail.as_mut() else {
            return;
        };
        if let Err(err) = file.write_all(record) {
            self.write_failures += 1;
            tracing::warn!(thread_id = self.thread_id, error = %err, "detail append failed");
            return;
        }
        self.detail_count += 1;
        self.detail_bytes += record.len() as u64;
        self.detail_times.note(header.timestamp);
        self.detail_seq_range = Some(match self.detail_seq_range {
            None => (header.index_seq, header.index_seq),
            Some((start, _)) => (start, header.index_seq),
        });
    }

    fn create_detail_file(&self) -> io::Result<File> {
        let mut file = File::create(self.dir.join("detail.atf"))?;
        let header = DetailFileHeader {
            thread_id: self.thread_id,
            ..DetailFileHeader::default()
        };
        file.write_all(&header.encode())?;
        Ok(file)
    }

    /// Flushes, writes footers, rewrites headers with the final counts and
    /// time ranges, and fsyncs. Idempotent.
    pub fn finalize(&mut self) -> io::Result<()> {
        if self.finalized {
            return Ok(());
        }
        self.finalized = true;

        let footer = IndexFileFooter {
            event_count: self.index_count,
            time_start_ns: self.index_times.start_ns,
            time_end_ns: self.index_times.end_ns,
            bytes_written: u64::from(self.index_count) * INDEX_EVENT_SIZE as u64,
        };
        self.index.write_all(&footer.encode())?;

        let mut flags = 0;
        if self.detail.is_some() {
            flags |= FLAG_HAS_DETAIL_FILE;
        }
        let header = IndexFileHeader {
            flags,
            thread_id: self.thread_id,
            event_count: self.index_count,
            footer_offset: 64 + self.index_count * INDEX_EVENT_SIZE as u32,
            time_start_ns: self.index_times.start_ns,
            time_end_ns: self.index_times.end_ns,
        };
        self.index.seek(SeekFrom::Start(0))?;
        self.index.write_all(&header.encode())?;
        self.index.sync_all()?;

        if let Some(detail) = self.detail.as_mut() {
            let footer = DetailFileFooter {
                event_count: self.detail_count,
                bytes_length: self.detail_bytes,
                time_start_ns: self.detail_times.start_ns,
                time_end_ns: self.detail_times.end_ns,
            };
            detail.write_all(&footer.encode())?;

            let (seq_start, seq_end) = self.detail_seq_range.unwrap_or((0, 0));
            let header = DetailFileHeader {
                flags: 0,
                thread_id: self.thread_id,
                event_count: self.detail_count,
                bytes_length: self.detail_bytes,
                index_seq_start: seq_start,
                index_seq_end: seq_end,
            };
            detail.seek(SeekFrom::Start(0))?;
            detail.write_all(&header.encode())?;
            detail.sync_all()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::FILE_HEADER_SIZE;
    use ada_trace::{DetailEventType, EventKind, IndexEvent, NO_DETAIL};

    fn index_record(ts: u64, detail_seq: u32) -> [u8; INDEX_EVENT_SIZE] {
        let mut buf = [0u8; INDEX_EVENT_SIZE];
        IndexEvent {
            timestamp_ns: ts,
            function_id: ada_trace::make_function_id(1, 1),
            thread_id: 7,
            event_kind: EventKind::Call as u32,
            call_depth: 1,
            detail_seq,
        }
        .write_to(&mut buf);
        buf
    }

    fn detail_record(ts: u64, index_seq: u32, payload: &[u8]) -> Vec<u8> {
        let total = DETAIL_HEADER_SIZE + payload.len();
        let mut rec = vec![0u8; total];
        DetailEventHeader {
            total_length: total as u32,
            event_type: DetailEventType::FunctionCall as u16,
            flags: 0,
            index_seq,
            thread_id: 7,
            timestamp: ts,
        }
        .write_to(&mut rec);
        rec[DETAIL_HEADER_SIZE..].copy_from_slice(payload);
        rec
    }

    #[test]
    fn ten_events_no_detail_has_exact_size_and_counts() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = ThreadTraceWriter::create(tmp.path(), 7).unwrap();

        for i in 0..10u64 {
            writer.append_index(&index_record(i * 100, NO_DETAIL));
        }
        writer.finalize().unwrap();

        let path = tmp.path().join("thread_7/index.atf");
        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 64 + 320 + 64);

        let hdr =
            IndexFileHeader::decode(bytes[..FILE_HEADER_SIZE].try_into().unwrap()).unwrap();
        assert_eq!(hdr.event_count, 10);
        assert_eq!(hdr.flags & FLAG_HAS_DETAIL_FILE, 0);
        assert_eq!(hdr.footer_offset, 64 + 320);
        assert_eq!(hdr.time_start_ns, 0);
        assert_eq!(hdr.time_end_ns, 900);

        let footer =
            IndexFileFooter::decode(bytes[64 + 320..].try_into().unwrap()).unwrap();
        assert_eq!(footer.event_count, 10);
        assert_eq!(footer.bytes_written, 320);

        assert!(!tmp.path().join("thread_7/detail.atf").exists());
    }

    #[test]
    fn detail_file_appears_lazily_and_links_back() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = ThreadTraceWriter::create(tmp.path(), 3).unwrap();

        writer.append_index(&index_record(0, 0));
        assert!(!tmp.path().join("thread_3/detail.atf").exists());

        writer.append_detail(&detail_record(0, 0, &[1u8; 16]));
        assert!(tmp.path().join("thread_3/detail.atf").exists());

        writer.append_index(&index_record(100, NO_DETAIL));
        writer.append_index(&index_record(200, 1));
        writer.append_detail(&detail_record(200, 2, &[2u8; 16]));
        writer.finalize().unwrap();

        let index = fs::read(tmp.path().join("thread_3/index.atf")).unwrap();
        let hdr = IndexFileHeader::decode(index[..64].try_into().unwrap()).unwrap();
        assert_eq!(hdr.flags & FLAG_HAS_DETAIL_FILE, FLAG_HAS_DETAIL_FILE);

        let detail = fs::read(tmp.path().join("thread_3/detail.atf")).unwrap();
        let expected_record_bytes = 2 * (DETAIL_HEADER_SIZE as u64 + 16);
        assert_eq!(detail.len() as u64, 64 + expected_record_bytes + 64);

        let dhdr = DetailFileHeader::decode(detail[..64].try_into().unwrap()).unwrap();
        assert_eq!(dhdr.event_count, 2);
        assert_eq!(dhdr.bytes_length, expected_record_bytes);
        assert_eq!(dhdr.index_seq_start, 0);
        assert_eq!(dhdr.index_seq_end, 2);

        // Walk records: their index_seq values are the backward links.
        let mut off = 64;
        let mut links = Vec::new();
        for _ in 0..dhdr.event_count {
            let rec_hdr = DetailEventHeader::read_from(&detail[off..]);
            links.push(rec_hdr.index_seq);
            off += rec_hdr.total_length as usize;
        }
        assert_eq!(links, vec![0, 2]);

        let dfooter = DetailFileFooter::decode(detail[off..].try_into().unwrap()).unwrap();
        assert_eq!(dfooter.event_count, 2);
        assert_eq!(dfooter.bytes_length, expected_record_bytes);
    }

    #[test]
    fn zero_event_file_is_still_valid() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = ThreadTraceWriter::create(tmp.path(), 11).unwrap();
        writer.finalize().unwrap();

        let bytes = fs::read(tmp.path().join("thread_11/index.atf")).unwrap();
        assert_eq!(bytes.len(), 128);
        let hdr = IndexFileHeader::decode(bytes[..64].try_into().unwrap()).unwrap();
        assert_eq!(hdr.event_count, 0);
        let footer = IndexFileFooter::decode(bytes[64..].try_into().unwrap()).unwrap();
        assert_eq!(footer.event_count, 0);
    }

    #[test]
    fn finalize_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let mut writer = ThreadTraceWriter::create(tmp.path(), 1).unwrap();
        writer.append_index(&index_record(5, NO_DETAIL));
        writer.finalize().unwrap();
        writer.finalize().unwrap();

        let bytes = fs::read(tmp.path().join("thread_1/index.atf")).unwrap();
        assert_eq!(bytes.len(), 64 + 32 + 64);
    }
}
