//! Error types for transport receivers
//!
//! Only connection-level failures end up here. Bad packets and sequence gaps
//! are reported as [`crate::ReceiverEvent`]s while the stream keeps running.

use eeg_core::EegError;
use std::time::Duration;
use thiserror::Error;

pub type AcquisitionResult<T> = Result<T, AcquisitionError>;

#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error(transparent)]
    Core(#[from] EegError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connecting to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    #[cfg(feature = "ble")]
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    #[error("bluetooth device unavailable: {reason}")]
    BleDevice { reason: String },

    #[error("no device answered discovery within {timeout:?}")]
    DiscoveryTimeout { timeout: Duration },

    #[error("receiver task failed: {reason}")]
    Task { reason: String },
}
