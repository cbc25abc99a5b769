//! Pre-defined EEG rhythm patterns for synthetic signals

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

/// Background rhythm generated on every channel, in µV
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalPattern {
    /// No rhythm, only noise and artifacts
    Silent,
    /// Pure sinusoid, identical on all channels
    Tone { frequency: f32, amplitude: f32 },
    /// Eyes-closed alpha rhythm, strongest on the last (occipital) channels
    Resting { alpha_frequency: f32, alpha_amplitude: f32 },
    /// Low-amplitude beta activity
    Alert { beta_amplitude: f32 },
    /// Theta with a trace of alpha
    Drowsy { theta_amplitude: f32 },
    /// Alpha that waxes and wanes in on/off cycles
    AlphaBursts {
        on_duration: f32,
        off_duration: f32,
        amplitude: f32,
    },
}

impl SignalPattern {
    /// Rhythm value at `time` on `channel` of `channels`
    pub fn value_at(&self, time: f32, channel: usize, channels: usize) -> f32 {
        // Small per-channel phase offset so channels are not identical copies
        let phase = channel as f32 * 0.35;
        match self {
            SignalPattern::Silent => 0.0,

            SignalPattern::Tone { frequency, amplitude } => {
                amplitude * (2.0 * PI * frequency * time).sin()
            }

            SignalPattern::Resting { alpha_frequency, alpha_amplitude } => {
                let weight = if channels > 1 {
                    0.4 + 0.6 * channel as f32 / (channels - 1) as f32
                } else {
                    1.0
                };
                weight * alpha_amplitude * (2.0 * PI * alpha_frequency * time + phase).sin()
                    + 3.0 * (2.0 * PI * 2.0 * time).sin()
            }

            SignalPattern::Alert { beta_amplitude } => {
                beta_amplitude * (2.0 * PI * 18.0 * time + phase).sin()
                    + 0.5 * beta_amplitude * (2.0 * PI * 24.0 * time + 2.0 * phase).sin()
            }

            SignalPattern::Drowsy { theta_amplitude } => {
                theta_amplitude * (2.0 * PI * 6.0 * time + phase).sin()
                    + 0.25 * theta_amplitude * (2.0 * PI * 10.0 * time).sin()
            }

            SignalPattern::AlphaBursts { on_duration, off_duration, amplitude } => {
                let cycle = on_duration + off_duration;
                if cycle <= 0.0 || time % cycle >= *on_duration {
                    0.0
                } else {
                    amplitude * (2.0 * PI * 10.0 * time + phase).sin()
                }
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SignalPattern::Silent => "Noise only",
            SignalPattern::Tone { .. } => "Test tone",
            SignalPattern::Resting { .. } => "Resting alpha",
            SignalPattern::Alert { .. } => "Alert beta",
            SignalPattern::Drowsy { .. } => "Drowsy theta",
            SignalPattern::AlphaBursts { .. } => "Alpha bursts",
        }
    }

    pub fn presets() -> Vec<(&'static str, SignalPattern)> {
        vec![
            ("Silent", SignalPattern::Silent),
            ("Calibration Tone", SignalPattern::Tone { frequency: 10.0, amplitude: 50.0 }),
            ("Eyes Closed", SignalPattern::Resting { alpha_frequency: 10.0, alpha_amplitude: 40.0 }),
            ("Focused", SignalPattern::Alert { beta_amplitude: 8.0 }),
            ("Drowsy", SignalPattern::Drowsy { theta_amplitude: 30.0 }),
            (
                "Alpha Bursts",
                SignalPattern::AlphaBursts {
                    on_duration: 2.0,
                    off_duration: 1.0,
                    amplitude: 35.0,
                },
            ),
        ]
    }
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Resting {
            alpha_frequency: 10.0,
            alpha_amplitude: 40.0,
        }
    }
}
