//! Error types for the simulation crate

use eeg_core::EegError;
use thiserror::Error;

pub type SimulationResult<T> = Result<T, SimulationError>;

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Core(#[from] EegError),

    #[error("emulator I/O error: {0}")]
    Io(#[from] std::io::Error),
}
