//! Error types for cycle pacing and real-time setup.

/// Errors from the pacing and thread-setup layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RtError {
    /// A cycle period of zero (or below platform resolution) was requested.
    #[error("cycle period {period_ns}ns is too short to schedule")]
    InvalidPeriod {
        /// The rejected period in nanoseconds.
        period_ns: u64,
    },

    /// The OS refused a real-time setup call that the configuration requires.
    #[error("real-time setup failed: {0}")]
    SetupFailed(String),
}

/// Result alias for this crate.
pub type RtResult<T = ()> = Result<T, RtError>;
