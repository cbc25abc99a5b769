//! Configuration for the streaming processor

use crate::error::{ProcessingError, ProcessingResult};
use eeg_core::duration_ms;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Butterworth order used for both the band-pass and low-pass designs
pub const FILTER_ORDER: usize = 4;

/// Quality factor of the mains notch
pub const NOTCH_Q: f64 = 30.0;

/// How per-channel filter state is initialized after a reconfiguration
///
/// State is always reset; it is never carried over or interpolated across a
/// channel-count, sample-rate or cutoff change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterResetPolicy {
    /// Steady-state response to a unit step, as a filter that had been running
    #[default]
    SteadyState,
    /// All-zero state; expect a start-up transient
    Zeroed,
}

/// Notch and band/low-pass settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    /// High-pass edge in Hz; 0 selects a pure low-pass
    pub high_pass: f64,
    /// Low-pass edge in Hz
    pub low_pass: f64,
    pub notch_enabled: bool,
    pub notch_freq: f64,
    pub reset_policy: FilterResetPolicy,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            high_pass: 0.0,
            low_pass: 100.0,
            notch_enabled: false,
            notch_freq: 50.0,
            reset_policy: FilterResetPolicy::SteadyState,
        }
    }
}

impl FilterSettings {
    /// Typical EEG band with mains rejection
    pub fn eeg_bandpass(notch_freq: f64) -> Self {
        Self {
            high_pass: 1.0,
            low_pass: 45.0,
            notch_enabled: true,
            notch_freq,
            ..Self::default()
        }
    }

    /// Whether `0 <= high_pass < low_pass < nyquist` holds
    pub fn band_is_valid(&self, sample_rate: f64) -> bool {
        let nyquist = 0.5 * sample_rate;
        self.high_pass >= 0.0 && self.low_pass > self.high_pass && self.low_pass < nyquist
    }
}

/// Timer cadence and buffer sizes of the processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Interval between queue drains
    #[serde(with = "duration_ms")]
    pub tick_interval: Duration,
    /// Spectrum computations per second
    pub spectrum_rate_hz: f64,
    /// Length of the FFT ring buffer in seconds
    pub fft_window_secs: f64,
    /// Chunks held before the oldest is discarded
    pub max_queued_chunks: usize,
    /// Length of the display ring buffer in (downsampled) samples
    pub display_samples: usize,
    /// Every n-th sample is kept for display
    pub display_downsample: usize,
    pub filters: FilterSettings,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(100),
            spectrum_rate_hz: 4.0,
            fft_window_secs: 1.0,
            max_queued_chunks: 200,
            display_samples: 12_000,
            display_downsample: 10,
            filters: FilterSettings::default(),
        }
    }
}

impl ProcessorSettings {
    pub fn spectrum_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.spectrum_rate_hz)
    }

    pub fn validate(&self) -> ProcessingResult<()> {
        if self.tick_interval.is_zero() {
            return Err(ProcessingError::configuration("tick interval must be positive"));
        }
        if !(self.spectrum_rate_hz.is_finite() && self.spectrum_rate_hz > 0.0) {
            return Err(ProcessingError::configuration("spectrum rate must be positive"));
        }
        if !(self.fft_window_secs.is_finite() && self.fft_window_secs > 0.0) {
            return Err(ProcessingError::configuration("FFT window must be positive"));
        }
        if self.max_queued_chunks == 0 || self.display_samples == 0 || self.display_downsample == 0 {
            return Err(ProcessingError::configuration(
                "queue, display length and downsample factor must be non-zero",
            ));
        }
        Ok(())
    }

    pub fn to_json(&self) -> ProcessingResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> ProcessingResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }
}
