//! Device wire protocol
//!
//! Every transport delivers the same packet family:
//!
//! ```text
//! Protected   (WiFi, Serial): magic(4) | seq(4, BE u32) | payload | crc16(2, BE)
//! Unprotected (BLE):          magic(4) | payload
//! payload = frames_per_packet x ( status(3) | channels x sample(3, signed BE 24-bit) )
//! ```
//!
//! The CRC covers `seq || payload`. BLE packets carry neither a sequence
//! number nor a checksum and rely on the link layer for integrity; this
//! asymmetry is kept as [`FrameLayout::Unprotected`].
//!
//! The host-to-device direction carries short control frames, see [`command`].

pub mod command;
pub mod crc;
pub mod decode;
pub mod framer;
pub mod sequence;
pub mod stream;

pub use command::{channel_mask, rate_code, CommandParser, DeviceCommand};
pub use crc::{crc16_ccitt, Crc16};
pub use decode::{sign_extend_24, SampleDecoder};
pub use framer::{DropReason, FrameOutcome, FramerStats, PacketFramer};
pub use sequence::{SequenceCheck, SequenceTracker};
pub use stream::{DecodeEvent, StreamDecoder};

use serde::{Deserialize, Serialize};

/// Packet header marker
pub const MAGIC: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];
pub const MAGIC_LEN: usize = MAGIC.len();
pub const SEQ_LEN: usize = 4;
pub const CRC_LEN: usize = 2;
/// Status bytes leading every frame
pub const STATUS_LEN: usize = 3;
/// Bytes per channel sample
pub const SAMPLE_LEN: usize = 3;

/// Which optional fields surround the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameLayout {
    /// Sequence number and CRC present (WiFi, Serial)
    Protected,
    /// Header and payload only (BLE)
    Unprotected,
}

impl FrameLayout {
    pub fn overhead(&self) -> usize {
        match self {
            FrameLayout::Protected => MAGIC_LEN + SEQ_LEN + CRC_LEN,
            FrameLayout::Unprotected => MAGIC_LEN,
        }
    }
}

/// Byte geometry of one packet, derived from channel count and batching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketGeometry {
    pub layout: FrameLayout,
    pub channels: usize,
    pub frames_per_packet: usize,
}

impl PacketGeometry {
    pub fn new(layout: FrameLayout, channels: usize, frames_per_packet: usize) -> Self {
        Self {
            layout,
            channels,
            frames_per_packet,
        }
    }

    pub fn frame_size(&self) -> usize {
        STATUS_LEN + self.channels * SAMPLE_LEN
    }

    pub fn payload_size(&self) -> usize {
        self.frames_per_packet * self.frame_size()
    }

    /// Total bytes of one packet including header and trailer
    pub fn packet_size(&self) -> usize {
        self.layout.overhead() + self.payload_size()
    }
}
