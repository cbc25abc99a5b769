//! Error types for the processing crate

use eeg_core::EegError;
use thiserror::Error;

pub type ProcessingResult<T> = Result<T, ProcessingError>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProcessingError {
    #[error(transparent)]
    Core(#[from] EegError),

    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Artifact model does not fit the data it was applied to
    #[error("artifact model error: {message}")]
    ArtifactModel { message: String },

    /// External trainer reported a failure
    #[error("training failed: {message}")]
    Training { message: String },

    #[error("processing service is not running")]
    ServiceClosed,

    #[error("failed to (de)serialize configuration: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProcessingError {
    pub fn configuration(message: impl Into<String>) -> Self {
        ProcessingError::Configuration {
            message: message.into(),
        }
    }

    pub fn artifact(message: impl Into<String>) -> Self {
        ProcessingError::ArtifactModel {
            message: message.into(),
        }
    }
}
