//! EEG-Core: Foundation types for multichannel EEG acquisition
//!
//! Shared sample containers, device profiles, channel-role mappings, the
//! wire protocol codec and the recording payload exchanged with persistence.

pub mod device;
pub mod duration_ms;
pub mod error;
pub mod protocol;
pub mod recording;
pub mod roles;
pub mod sample_chunk;

pub use device::*;
pub use error::{EegError, EegResult};
pub use recording::*;
pub use roles::*;
pub use sample_chunk::*;
