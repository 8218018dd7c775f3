//! ada-collector: the out-of-process side of the tracing pipeline.
//!
//! The controller builds the shared-memory fabric, runs the single drain
//! thread that consumes submitted rings from every traced thread, and
//! persists events into per-thread binary trace files (`index.atf` always,
//! `detail.atf` when a marked window elected detail data for persistence).
//! Shutdown is phased and bounded: close the gates, final-drain, finalize
//! and fsync every file, report a summary.

mod drain;
mod error;
mod format;
mod metrics;
mod session;
mod shutdown;
mod wake;
mod writer;

pub use drain::DrainConfig;
pub use error::CollectorError;
pub use format::{
    current_arch, current_os, DetailFileFooter, DetailFileHeader, FormatError, IndexFileFooter,
    IndexFileHeader, CLOCK_MONOTONIC_NS, DETAIL_FOOTER_MAGIC, DETAIL_HEADER_MAGIC, ENDIAN_LITTLE,
    FILE_FOOTER_SIZE, FILE_HEADER_SIZE, FLAG_HAS_DETAIL_FILE, FORMAT_VERSION, INDEX_FOOTER_MAGIC,
    INDEX_HEADER_MAGIC,
};
pub use metrics::{
    DrainSummary, LaneStats, SystemMetricsSnapshot, SystemTotals, ThreadMetricsSnapshot,
};
pub use session::{agent_search_paths, ControllerSession, SessionConfig, ENV_AGENT_SEARCH_PATHS};
pub use shutdown::ShutdownController;
pub use writer::ThreadTraceWriter;
