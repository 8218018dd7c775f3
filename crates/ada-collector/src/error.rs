//! Controller-side error type.

use ada_trace::FabricError;
use thiserror::Error;

/// Errors surfaced by session construction and shutdown. The drain loop
/// itself never returns these; its I/O failures are counted per thread and
/// reported in the summary.
#[derive(Debug, Error)]
pub enum CollectorError {
    /// Fabric construction or validation failed.
    #[error(transparent)]
    Fabric(#[from] FabricError),

    /// Session directory or wake-channel I/O failed.
    #[error("session I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The summary report could not be serialized.
    #[error("summary serialization: {0}")]
    Summary(#[from] serde_json::Error),

    /// The drain thread is gone without producing a summary.
    #[error("drain thread panicked")]
    DrainPanicked,
}
