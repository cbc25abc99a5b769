//! Acquisition device profile
//!
//! Describes the ADC front-end a receiver talks to: how many channels it
//! streams, at what rate, and how raw 24-bit codes map to microvolts.

use crate::error::{EegError, EegResult};
use crate::protocol::{SAMPLE_LEN, STATUS_LEN};
use serde::{Deserialize, Serialize};

/// Largest channel count the framing code accepts
pub const MAX_CHANNELS: usize = 32;

/// Full-scale positive code of a 24-bit signed ADC (2^23 - 1)
pub const ADC_FULL_SCALE: f64 = 8_388_607.0;

/// Static description of the measurement front-end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Number of EEG channels per frame
    pub channel_count: usize,
    /// Sampling rate in Hz
    pub sample_rate: f32,
    /// ADC reference voltage in volts
    pub v_ref: f64,
    /// Programmable gain amplifier setting
    pub gain: f64,
    /// Frames carried by one wire packet
    pub frames_per_packet: usize,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            channel_count: 8,
            sample_rate: 1000.0,
            v_ref: 4.5,
            gain: 24.0,
            frames_per_packet: 50,
        }
    }
}

impl DeviceProfile {
    /// Profile for the BLE firmware, which batches fewer frames per notification
    pub fn ble() -> Self {
        Self {
            frames_per_packet: 10,
            ..Self::default()
        }
    }

    pub fn with_channels(mut self, channel_count: usize) -> Self {
        self.channel_count = channel_count;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_gain(mut self, gain: f64) -> Self {
        self.gain = gain;
        self
    }

    pub fn with_frames_per_packet(mut self, frames_per_packet: usize) -> Self {
        self.frames_per_packet = frames_per_packet;
        self
    }

    /// Check the profile before handing it to a codec or processor
    pub fn validate(&self) -> EegResult<()> {
        validate_channel_count(self.channel_count)?;
        validate_sample_rate(self.sample_rate)?;
        if self.frames_per_packet == 0 {
            return Err(EegError::config("frames_per_packet must be at least 1"));
        }
        if !self.v_ref.is_finite() || self.v_ref <= 0.0 {
            return Err(EegError::config(format!("invalid reference voltage {}", self.v_ref)));
        }
        if !self.gain.is_finite() || self.gain < 0.0 {
            return Err(EegError::config(format!("invalid gain {}", self.gain)));
        }
        Ok(())
    }

    /// Microvolts per LSB: `Vref / Gain / (2^23 - 1) * 1e6`
    ///
    /// A zero gain yields a zero scale rather than infinity.
    pub fn lsb_to_microvolts(&self) -> f64 {
        if self.gain == 0.0 {
            return 0.0;
        }
        self.v_ref / self.gain / ADC_FULL_SCALE * 1e6
    }

    /// Bytes in one frame: status header plus one 24-bit code per channel
    pub fn frame_size(&self) -> usize {
        STATUS_LEN + self.channel_count * SAMPLE_LEN
    }

    pub fn payload_size(&self) -> usize {
        self.frames_per_packet * self.frame_size()
    }
}

pub fn validate_channel_count(channel_count: usize) -> EegResult<()> {
    if channel_count == 0 || channel_count > MAX_CHANNELS {
        return Err(EegError::TooManyChannels {
            requested: channel_count,
            max_supported: MAX_CHANNELS,
        });
    }
    Ok(())
}

pub fn validate_sample_rate(sample_rate: f32) -> EegResult<()> {
    if !sample_rate.is_finite() || sample_rate <= 0.0 {
        return Err(EegError::InvalidSampleRate { rate: sample_rate });
    }
    Ok(())
}

/// Default display names: `CH 1` .. `CH n`
pub fn default_channel_names(channel_count: usize) -> Vec<String> {
    (1..=channel_count).map(|i| format!("CH {}", i)).collect()
}
