//! Error taxonomy for the fabric.
//!
//! Hot paths never surface these: a full ring, an exhausted pool, or a failed
//! stack capture is accounted into the lane counters and execution continues.
//! `FabricError` is what the control plane (arena construction, registration,
//! attach) returns.

use thiserror::Error;

/// Errors surfaced by control-plane operations.
#[derive(Debug, Error)]
pub enum FabricError {
    /// The shared-memory arena could not be created or opened.
    #[error("shared memory arena {name:?}: {source}")]
    ShmOpenFailed {
        /// Arena name that failed.
        name: String,
        /// Underlying OS error.
        #[source]
        source: std::io::Error,
    },

    /// Arena header magic or version did not match.
    #[error("arena layout mismatch: {0}")]
    LayoutMismatch(&'static str),

    /// The registry has no free slots or is not accepting registrations.
    #[error("thread registration rejected: {0}")]
    RegistrationRejected(&'static str),

    /// The agent handshake payload carried no usable identity.
    #[error("invalid handshake: {0}")]
    InvalidHandshake(&'static str),
}

impl FabricError {
    /// Returns `true` if retrying the operation could succeed.
    #[inline]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RegistrationRejected(_))
    }

    /// Returns `true` if the session cannot proceed at all.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ShmOpenFailed { .. } | Self::LayoutMismatch(_) | Self::InvalidHandshake(_)
        )
    }
}
