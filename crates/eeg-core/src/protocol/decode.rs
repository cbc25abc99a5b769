//! Payload to physical-unit sample conversion

use super::{SAMPLE_LEN, STATUS_LEN};
use crate::device::DeviceProfile;
use crate::error::{EegError, EegResult};
use crate::sample_chunk::SampleChunk;
use ndarray::Array2;

/// Interpret three big-endian bytes as a signed 24-bit integer
#[inline]
pub fn sign_extend_24(b: [u8; 3]) -> i32 {
    let raw = ((b[0] as i32) << 16) | ((b[1] as i32) << 8) | b[2] as i32;
    if raw >= 0x80_0000 {
        raw - 0x100_0000
    } else {
        raw
    }
}

/// Converts packet payloads into `[channels][frames]` µV chunks
#[derive(Debug, Clone, PartialEq)]
pub struct SampleDecoder {
    channels: usize,
    frames_per_packet: usize,
    scale: f64,
}

impl SampleDecoder {
    pub fn new(channels: usize, frames_per_packet: usize, scale: f64) -> Self {
        Self {
            channels,
            frames_per_packet,
            scale,
        }
    }

    pub fn from_profile(profile: &DeviceProfile) -> Self {
        Self::new(
            profile.channel_count,
            profile.frames_per_packet,
            profile.lsb_to_microvolts(),
        )
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn frames_per_packet(&self) -> usize {
        self.frames_per_packet
    }

    /// µV per LSB currently applied
    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn set_scale(&mut self, scale: f64) {
        self.scale = scale;
    }

    pub fn set_channels(&mut self, channels: usize) {
        self.channels = channels;
    }

    pub fn set_frames_per_packet(&mut self, frames_per_packet: usize) {
        self.frames_per_packet = frames_per_packet;
    }

    pub fn frame_size(&self) -> usize {
        STATUS_LEN + self.channels * SAMPLE_LEN
    }

    /// Decode one payload; its length must be exactly `frames_per_packet * frame_size`
    pub fn decode(&self, payload: &[u8]) -> EegResult<SampleChunk> {
        let frame_size = self.frame_size();
        let expected = self.frames_per_packet * frame_size;
        if payload.len() != expected {
            return Err(EegError::shape(format!(
                "payload is {} bytes, expected {}",
                payload.len(),
                expected
            )));
        }

        let mut data = Array2::<f32>::zeros((self.channels, self.frames_per_packet));
        for (frame_idx, frame) in payload.chunks_exact(frame_size).enumerate() {
            let samples = &frame[STATUS_LEN..];
            for (ch, code) in samples.chunks_exact(SAMPLE_LEN).enumerate() {
                let raw = sign_extend_24([code[0], code[1], code[2]]);
                data[[ch, frame_idx]] = (raw as f64 * self.scale) as f32;
            }
        }
        Ok(SampleChunk::new(data))
    }
}
