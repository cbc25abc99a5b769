//! Error handling for the EEG core
//!
//! Per-packet problems are never errors here: the codec reports them as
//! [`crate::protocol::FrameOutcome::Dropped`]. These variants cover
//! configuration and data-shape failures only.

use thiserror::Error;

/// Result type alias for core operations
pub type EegResult<T> = Result<T, EegError>;

/// Error type for core operations
#[derive(Debug, Clone, PartialEq, Error)]
#[non_exhaustive]
pub enum EegError {
    /// Invalid device or processing configuration
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// Channel count outside the supported range
    #[error("unsupported channel count {requested} (supported 1..={max_supported})")]
    TooManyChannels {
        requested: usize,
        max_supported: usize,
    },

    /// Sample rate is zero, negative or not finite
    #[error("invalid sample rate: {rate} Hz")]
    InvalidSampleRate { rate: f32 },

    /// Two chunks or matrices disagree on their channel dimension
    #[error("channel count mismatch: expected {expected}, got {actual}")]
    ChannelMismatch { expected: usize, actual: usize },

    /// Matrix shape does not fit the requested operation
    #[error("shape mismatch: {reason}")]
    ShapeMismatch { reason: String },

    /// A channel role could not be resolved from the configured names
    #[error("channel role '{role}' not found among channels {available:?}")]
    UnresolvedChannelRole {
        role: &'static str,
        available: Vec<String>,
    },

    /// Persistence payload could not be interpreted
    #[error("invalid recording payload: {reason}")]
    InvalidPayload { reason: String },
}

impl EegError {
    pub fn config(reason: impl Into<String>) -> Self {
        EegError::InvalidConfig {
            reason: reason.into(),
        }
    }

    pub fn shape(reason: impl Into<String>) -> Self {
        EegError::ShapeMismatch {
            reason: reason.into(),
        }
    }
}
