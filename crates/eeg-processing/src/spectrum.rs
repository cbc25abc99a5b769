//! FFT magnitude spectrum and canonical EEG band powers

use crate::error::{ProcessingError, ProcessingResult};
use crate::ring::SampleRing;
use ndarray::Array2;
use realfft::{RealFftPlanner, RealToComplex};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;

/// Canonical EEG frequency bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EegBand {
    Delta,
    Theta,
    Alpha,
    Beta,
    Gamma,
}

impl EegBand {
    pub const ALL: [EegBand; 5] = [
        EegBand::Delta,
        EegBand::Theta,
        EegBand::Alpha,
        EegBand::Beta,
        EegBand::Gamma,
    ];

    /// Half-open range `[low, high)` in Hz
    pub fn range(&self) -> (f32, f32) {
        match self {
            EegBand::Delta => (0.5, 4.0),
            EegBand::Theta => (4.0, 8.0),
            EegBand::Alpha => (8.0, 13.0),
            EegBand::Beta => (13.0, 30.0),
            EegBand::Gamma => (30.0, 100.0),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            EegBand::Delta => "Delta",
            EegBand::Theta => "Theta",
            EegBand::Alpha => "Alpha",
            EegBand::Beta => "Beta",
            EegBand::Gamma => "Gamma",
        }
    }
}

/// Mean squared magnitude per band, across all channels
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BandPowers {
    pub delta: f32,
    pub theta: f32,
    pub alpha: f32,
    pub beta: f32,
    pub gamma: f32,
}

impl BandPowers {
    pub fn get(&self, band: EegBand) -> f32 {
        match band {
            EegBand::Delta => self.delta,
            EegBand::Theta => self.theta,
            EegBand::Alpha => self.alpha,
            EegBand::Beta => self.beta,
            EegBand::Gamma => self.gamma,
        }
    }

    fn set(&mut self, band: EegBand, value: f32) {
        match band {
            EegBand::Delta => self.delta = value,
            EegBand::Theta => self.theta = value,
            EegBand::Alpha => self.alpha = value,
            EegBand::Beta => self.beta = value,
            EegBand::Gamma => self.gamma = value,
        }
    }

    pub fn to_array(&self) -> [f32; 5] {
        EegBand::ALL.map(|b| self.get(b))
    }
}

/// One spectrum update
#[derive(Debug, Clone, PartialEq)]
pub struct Spectrum {
    /// Bin centre frequencies in Hz
    pub freqs: Vec<f32>,
    /// `[channels][bins]`, normalized by window length
    pub magnitudes: Array2<f32>,
    pub band_powers: BandPowers,
}

/// Hann-windowed real FFT over a [`SampleRing`]
pub struct SpectrumAnalyzer {
    len: usize,
    window: Vec<f32>,
    freqs: Vec<f32>,
    fft: Arc<dyn RealToComplex<f32>>,
}

impl std::fmt::Debug for SpectrumAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpectrumAnalyzer").field("len", &self.len).finish()
    }
}

impl SpectrumAnalyzer {
    pub fn new(len: usize, sample_rate: f32) -> ProcessingResult<Self> {
        if len < 2 {
            return Err(ProcessingError::configuration(format!(
                "FFT length must be at least 2, got {}",
                len
            )));
        }
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(len);
        let bins = len / 2 + 1;
        let freqs = (0..bins).map(|k| k as f32 * sample_rate / len as f32).collect();
        Ok(Self {
            len,
            window: hann(len),
            freqs,
            fft,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn freqs(&self) -> &[f32] {
        &self.freqs
    }

    /// Detrend (mean removal), window, transform and derive band powers
    pub fn analyze(&self, ring: &SampleRing) -> ProcessingResult<Spectrum> {
        if ring.len() != self.len {
            return Err(ProcessingError::configuration(format!(
                "ring length {} does not match FFT length {}",
                ring.len(),
                self.len
            )));
        }
        let data = ring.linearized();
        let bins = self.freqs.len();
        let mut magnitudes = Array2::<f32>::zeros((data.nrows(), bins));
        let mut input = self.fft.make_input_vec();
        let mut output = self.fft.make_output_vec();

        for (ch, row) in data.rows().into_iter().enumerate() {
            let mean = row.sum() / self.len as f32;
            for ((dst, &x), &w) in input.iter_mut().zip(row.iter()).zip(self.window.iter()) {
                *dst = (x - mean) * w;
            }
            self.fft
                .process(&mut input, &mut output)
                .map_err(|e| ProcessingError::configuration(format!("FFT failed: {}", e)))?;
            for (k, c) in output.iter().enumerate() {
                magnitudes[[ch, k]] = c.norm() / self.len as f32;
            }
        }

        let band_powers = self.band_powers(&magnitudes);
        Ok(Spectrum {
            freqs: self.freqs.clone(),
            magnitudes,
            band_powers,
        })
    }

    /// Mean of squared magnitude over channels and the bins inside each band
    pub fn band_powers(&self, magnitudes: &Array2<f32>) -> BandPowers {
        let mut powers = BandPowers::default();
        for band in EegBand::ALL {
            let (low, high) = band.range();
            let bins: Vec<usize> = self
                .freqs
                .iter()
                .enumerate()
                .filter(|(_, f)| **f >= low && **f < high)
                .map(|(k, _)| k)
                .collect();
            if bins.is_empty() || magnitudes.nrows() == 0 {
                continue;
            }
            let total: f32 = magnitudes
                .rows()
                .into_iter()
                .flat_map(|row| bins.iter().map(move |&k| row[k] * row[k]))
                .sum();
            powers.set(band, total / (bins.len() * magnitudes.nrows()) as f32);
        }
        powers
    }
}

/// Symmetric Hann window
fn hann(len: usize) -> Vec<f32> {
    if len == 1 {
        return vec![1.0];
    }
    let denom = (len - 1) as f32;
    (0..len)
        .map(|n| 0.5 - 0.5 * (2.0 * PI * n as f32 / denom).cos())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use eeg_core::SampleChunk;

    fn tone_chunk(freq: f32, fs: f32, n: usize, amp: f32) -> SampleChunk {
        let row: Vec<f32> = (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / fs).sin() + 5.0)
            .collect();
        SampleChunk::from_rows(vec![row.clone(), row]).unwrap()
    }

    #[test]
    fn test_alpha_tone_dominates() {
        let fs = 250.0;
        let analyzer = SpectrumAnalyzer::new(250, fs).unwrap();
        let mut ring = SampleRing::new(2, 250);
        ring.push(&tone_chunk(10.0, fs, 250, 20.0));

        let spectrum = analyzer.analyze(&ring).unwrap();
        assert_eq!(spectrum.freqs.len(), 126);
        assert_eq!(spectrum.magnitudes.dim(), (2, 126));

        // DC offset removed by detrending
        assert!(spectrum.magnitudes[[0, 0]] < 0.05);
        let peak = (0..126)
            .max_by(|&a, &b| spectrum.magnitudes[[0, a]].total_cmp(&spectrum.magnitudes[[0, b]]))
            .unwrap();
        assert_eq!(peak, 10);

        let p = spectrum.band_powers;
        assert!(p.alpha > p.delta && p.alpha > p.theta && p.alpha > p.beta && p.alpha > p.gamma);
    }

    #[test]
    fn test_band_without_bins_is_zero() {
        // 4 Hz resolution at 64 Hz / 16 bins: no bin inside [0.5, 4)
        let analyzer = SpectrumAnalyzer::new(16, 64.0).unwrap();
        let mut ring = SampleRing::new(1, 16);
        ring.push(&SampleChunk::from_rows(vec![(0..16).map(|i| i as f32).collect()]).unwrap());
        let spectrum = analyzer.analyze(&ring).unwrap();
        assert_eq!(spectrum.band_powers.delta, 0.0);
        assert!(spectrum.band_powers.theta > 0.0);
    }

    #[test]
    fn test_hann_window_shape() {
        let w = hann(5);
        assert_eq!(w[0], 0.0);
        assert!((w[2] - 1.0).abs() < 1e-6);
        assert!(w[4].abs() < 1e-6);
    }
}
