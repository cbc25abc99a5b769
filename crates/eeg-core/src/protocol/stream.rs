//! Byte stream to sample chunks: framing, loss detection and decoding

use super::{
    DropReason, FrameLayout, FrameOutcome, FramerStats, PacketFramer, PacketGeometry,
    SampleDecoder, SequenceCheck, SequenceTracker,
};
use crate::device::{validate_channel_count, DeviceProfile};
use crate::error::{EegError, EegResult};
use crate::sample_chunk::SampleChunk;
use tracing::{info, warn};

/// Everything a transport's byte stream can yield
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeEvent {
    Chunk { seq: Option<u32>, chunk: SampleChunk },
    Dropped { reason: DropReason },
    /// Emitted before the chunk whose sequence number revealed the gap
    Loss { missing: u32, last: u32, current: u32 },
}

/// Per-connection decoding state
///
/// Owns the framer, sequence tracker and sample decoder for one transport
/// connection. Reconfiguration recomputes the packet size and scale factor.
pub struct StreamDecoder {
    profile: DeviceProfile,
    layout: FrameLayout,
    framer: PacketFramer,
    tracker: SequenceTracker,
    decoder: SampleDecoder,
}

impl StreamDecoder {
    pub fn new(profile: DeviceProfile, layout: FrameLayout, max_buffer: usize) -> EegResult<Self> {
        profile.validate()?;
        let geometry = PacketGeometry::new(layout, profile.channel_count, profile.frames_per_packet);
        Ok(Self {
            framer: PacketFramer::new(geometry, max_buffer),
            tracker: SequenceTracker::new(),
            decoder: SampleDecoder::from_profile(&profile),
            profile,
            layout,
        })
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn layout(&self) -> FrameLayout {
        self.layout
    }

    pub fn packet_size(&self) -> usize {
        self.framer.geometry().packet_size()
    }

    pub fn stats(&self) -> FramerStats {
        self.framer.stats()
    }

    /// Feed received bytes and collect every event they complete
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<DecodeEvent> {
        self.framer.extend(bytes);
        let mut events = Vec::new();

        while let Some(outcome) = self.framer.next_packet() {
            match outcome {
                FrameOutcome::Packet { seq, payload } => {
                    if let Some(seq) = seq {
                        if let Some(loss) = self.track(seq) {
                            events.push(loss);
                        }
                    }
                    match self.decoder.decode(&payload) {
                        Ok(chunk) => events.push(DecodeEvent::Chunk { seq, chunk }),
                        Err(e) => {
                            warn!(error = %e, "undecodable payload, dropping");
                            events.push(DecodeEvent::Dropped {
                                reason: DropReason::Malformed {
                                    reason: e.to_string(),
                                },
                            });
                        }
                    }
                }
                FrameOutcome::Dropped { reason } => events.push(DecodeEvent::Dropped { reason }),
            }
        }

        events
    }

    fn track(&mut self, seq: u32) -> Option<DecodeEvent> {
        match self.tracker.observe(seq) {
            SequenceCheck::First | SequenceCheck::InOrder => None,
            SequenceCheck::Gap { missing, last, current } => {
                warn!(missing, last, current, "packet loss detected");
                Some(DecodeEvent::Loss { missing, last, current })
            }
            SequenceCheck::Regression { last, current } => {
                warn!(last, current, "sequence number went backwards, device restarted?");
                None
            }
        }
    }

    /// Recompute packet size for a new batching factor
    pub fn set_frames_per_packet(&mut self, frames_per_packet: usize) -> EegResult<()> {
        if frames_per_packet == 0 {
            return Err(EegError::config("frames_per_packet must be at least 1"));
        }
        self.profile.frames_per_packet = frames_per_packet;
        self.decoder.set_frames_per_packet(frames_per_packet);
        self.apply_geometry();
        info!(frames_per_packet, packet_size = self.packet_size(), "frames per packet updated");
        Ok(())
    }

    pub fn set_channel_count(&mut self, channels: usize) -> EegResult<()> {
        validate_channel_count(channels)?;
        self.profile.channel_count = channels;
        self.decoder.set_channels(channels);
        self.apply_geometry();
        info!(channels, packet_size = self.packet_size(), "channel count updated");
        Ok(())
    }

    /// Change the PGA gain; only the scale factor changes
    pub fn set_gain(&mut self, gain: f64) -> EegResult<()> {
        if !gain.is_finite() || gain < 0.0 {
            return Err(EegError::config(format!("invalid gain {}", gain)));
        }
        self.profile.gain = gain;
        self.decoder.set_scale(self.profile.lsb_to_microvolts());
        info!(gain, scale = self.decoder.scale(), "gain updated");
        Ok(())
    }

    /// Forget buffered bytes and the last sequence number
    pub fn reset(&mut self) {
        self.framer.clear();
        self.tracker.reset();
    }

    fn apply_geometry(&mut self) {
        self.framer.set_geometry(PacketGeometry::new(
            self.layout,
            self.profile.channel_count,
            self.profile.frames_per_packet,
        ));
        self.tracker.reset();
    }
}
