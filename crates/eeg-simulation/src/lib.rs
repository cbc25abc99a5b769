//! EEG-Simulation: synthetic signals and an emulated acquisition device
//!
//! Generates realistic EEG for tests and demos, encodes it in the device wire
//! format and serves it over TCP and UDP discovery the way the board does.

pub mod device_emulator;
pub mod discovery_responder;
pub mod eeg_simulator;
pub mod error;
pub mod packet_encoder;
pub mod signal_patterns;

pub use device_emulator::*;
pub use discovery_responder::*;
pub use eeg_simulator::*;
pub use error::{SimulationError, SimulationResult};
pub use packet_encoder::*;
pub use signal_patterns::*;
