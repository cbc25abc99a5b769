//! EEG-Acquisition: transport receivers for the acquisition board
//!
//! Each transport (WiFi, serial, optional BLE) runs on its own task, feeds
//! the core stream decoder and publishes [`SampleChunk`](eeg_core::SampleChunk)s
//! plus connection status on broadcast channels. Discovery finds a board's
//! IP with a UDP broadcast.

pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod receiver;
pub mod transports;

pub use config::*;
pub use discovery::{discover, DiscoveredDevice};
pub use error::{AcquisitionError, AcquisitionResult};
pub use events::*;
pub use receiver::*;
pub use transports::*;
