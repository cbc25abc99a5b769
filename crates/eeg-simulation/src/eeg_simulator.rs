//! Synthetic EEG generator producing µV sample chunks

use crate::signal_patterns::SignalPattern;
use eeg_core::{validate_channel_count, validate_sample_rate, EegError, EegResult, SampleChunk};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Noise and artifact configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    /// Gaussian noise standard deviation in µV (0.0 = no noise)
    pub gaussian_std: f32,
    /// Amplitude of a slow baseline drift in µV
    pub baseline_wander: f32,
    /// Expected eye blinks per second
    pub blink_rate: f32,
    /// Peak blink deflection in µV on the frontal channels
    pub blink_amplitude: f32,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            gaussian_std: 2.0,
            baseline_wander: 5.0,
            blink_rate: 0.2,
            blink_amplitude: 150.0,
        }
    }
}

impl NoiseConfig {
    /// Deterministic output, for tests
    pub fn none() -> Self {
        Self {
            gaussian_std: 0.0,
            baseline_wander: 0.0,
            blink_rate: 0.0,
            blink_amplitude: 0.0,
        }
    }
}

/// Configuration for EEG simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EegSimulatorConfig {
    pub sample_rate: f32,
    pub channel_count: usize,
    pub pattern: SignalPattern,
    pub noise: NoiseConfig,
    /// Mains interference frequency, if any
    pub powerline_freq: Option<f32>,
    pub powerline_amplitude: f32,
    /// Random seed for reproducibility
    pub seed: Option<u64>,
}

impl Default for EegSimulatorConfig {
    fn default() -> Self {
        Self {
            sample_rate: 1000.0,
            channel_count: 8,
            pattern: SignalPattern::default(),
            noise: NoiseConfig::default(),
            powerline_freq: Some(50.0),
            powerline_amplitude: 10.0,
            seed: None,
        }
    }
}

/// Blink duration in seconds
const BLINK_SECS: f32 = 0.25;
/// Channels carrying blink artifacts (frontal / EOG positions)
const BLINK_CHANNELS: usize = 2;

pub struct EegSimulator {
    config: EegSimulatorConfig,
    rng: StdRng,
    normal: Normal<f32>,
    sample_index: u64,
    /// Samples left in the current blink, and its total length
    blink: Option<(usize, usize)>,
}

impl EegSimulator {
    pub fn new(config: EegSimulatorConfig) -> EegResult<Self> {
        validate_sample_rate(config.sample_rate)?;
        validate_channel_count(config.channel_count)?;

        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let normal = Normal::new(0.0, config.noise.gaussian_std)
            .map_err(|e| EegError::config(format!("invalid noise distribution: {}", e)))?;

        Ok(Self {
            config,
            rng,
            normal,
            sample_index: 0,
            blink: None,
        })
    }

    pub fn config(&self) -> &EegSimulatorConfig {
        &self.config
    }

    pub fn set_pattern(&mut self, pattern: SignalPattern) {
        self.config.pattern = pattern;
    }

    /// Samples generated since construction or the last reset
    pub fn elapsed_samples(&self) -> u64 {
        self.sample_index
    }

    pub fn reset_time(&mut self) {
        self.sample_index = 0;
        self.blink = None;
    }

    /// Generate the next `frames` samples on every channel
    pub fn generate(&mut self, frames: usize) -> SampleChunk {
        let channels = self.config.channel_count;
        let dt = 1.0 / self.config.sample_rate;
        let mut data = Array2::<f32>::zeros((channels, frames));

        for frame in 0..frames {
            let time = (self.sample_index + frame as u64) as f32 * dt;
            let blink = self.next_blink_value();
            let drift = self.config.noise.baseline_wander * (2.0 * PI * 0.1 * time).sin();
            let hum = match self.config.powerline_freq {
                Some(freq) => self.config.powerline_amplitude * (2.0 * PI * freq * time).sin(),
                None => 0.0,
            };

            for ch in 0..channels {
                let mut value = self.config.pattern.value_at(time, ch, channels) + drift + hum;
                if self.config.noise.gaussian_std > 0.0 {
                    value += self.normal.sample(&mut self.rng);
                }
                if ch < BLINK_CHANNELS {
                    value += blink;
                }
                data[[ch, frame]] = value;
            }
        }

        self.sample_index += frames as u64;
        SampleChunk::new(data)
    }

    fn next_blink_value(&mut self) -> f32 {
        let noise = &self.config.noise;
        if self.blink.is_none() && noise.blink_rate > 0.0 {
            let p = noise.blink_rate / self.config.sample_rate;
            if self.rng.gen::<f32>() < p {
                let len = ((BLINK_SECS * self.config.sample_rate) as usize).max(1);
                self.blink = Some((len, len));
            }
        }
        match self.blink {
            Some((remaining, len)) => {
                let progress = (len - remaining) as f32 / len as f32;
                self.blink = if remaining > 1 {
                    Some((remaining - 1, len))
                } else {
                    None
                };
                noise.blink_amplitude * (PI * progress).sin()
            }
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quiet(pattern: SignalPattern) -> EegSimulatorConfig {
        EegSimulatorConfig {
            sample_rate: 250.0,
            channel_count: 4,
            pattern,
            noise: NoiseConfig::none(),
            powerline_freq: None,
            seed: Some(1),
            ..EegSimulatorConfig::default()
        }
    }

    #[test]
    fn test_chunk_shape_and_continuity() {
        let mut sim = EegSimulator::new(quiet(SignalPattern::Tone { frequency: 5.0, amplitude: 10.0 })).unwrap();
        let a = sim.generate(100);
        let b = sim.generate(150);
        assert_eq!(a.channels(), 4);
        assert_eq!(b.frames(), 150);
        assert_eq!(sim.elapsed_samples(), 250);

        let mut again = EegSimulator::new(quiet(SignalPattern::Tone { frequency: 5.0, amplitude: 10.0 })).unwrap();
        let whole = again.generate(250);
        let joined = SampleChunk::concat(&[a, b]).unwrap().unwrap();
        assert_eq!(joined, whole);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let config = EegSimulatorConfig {
            seed: Some(99),
            ..EegSimulatorConfig::default()
        };
        let mut a = EegSimulator::new(config.clone()).unwrap();
        let mut b = EegSimulator::new(config).unwrap();
        assert_eq!(a.generate(500), b.generate(500));
    }

    #[test]
    fn test_blinks_hit_frontal_channels_only() {
        let mut config = quiet(SignalPattern::Silent);
        config.noise.blink_rate = 50.0;
        config.noise.blink_amplitude = 100.0;
        let mut sim = EegSimulator::new(config).unwrap();
        let chunk = sim.generate(1000);
        assert!(chunk.row(0).iter().any(|&v| v > 50.0));
        assert!(chunk.row(3).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = EegSimulatorConfig::default();
        config.channel_count = 0;
        assert!(EegSimulator::new(config).is_err());
    }
}
