//! Status and diagnostics emitted by a running receiver

use eeg_core::protocol::DropReason;
use std::fmt;

/// Connection lifecycle as seen by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting { target: String },
    Connected { target: String },
    Error { message: String },
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connecting { target } => write!(f, "Connecting to {}...", target),
            ConnectionStatus::Connected { target } => write!(f, "Connected: {}", target),
            ConnectionStatus::Error { message } => write!(f, "Error: {}", message),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReceiverEvent {
    Status(ConnectionStatus),
    PacketLoss { missing: u32, last: u32, current: u32 },
    PacketDropped { reason: DropReason },
    /// Decoder geometry changed after a runtime command
    Reconfigured { packet_size: usize },
}

/// Per-connection counters, reset when a connection is established
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiverStats {
    pub is_connected: bool,
    pub bytes_received: u64,
    pub chunks_decoded: u64,
    pub packets_lost: u64,
    pub packets_dropped: u64,
    pub sync_losses: u64,
    pub overflow_clears: u64,
}
