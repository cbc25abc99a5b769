//! Streaming IIR filters for EEG channels
//!
//! Filters are cascades of second-order sections in transposed direct form
//! II, with coefficients and state in `f64`. State is kept per channel and
//! carried across calls, so filtering a signal in pieces gives the same
//! output as filtering it in one block.

use crate::config::{FilterResetPolicy, FilterSettings, FILTER_ORDER, NOTCH_Q};
use crate::error::{ProcessingError, ProcessingResult};
use eeg_core::SampleChunk;
use num_complex::Complex64;
use std::f64::consts::PI;
use tracing::{debug, info};

/// Single biquad section (2nd order)
///
/// `y[n] = b0*x[n] + b1*x[n-1] + b2*x[n-2] - a1*y[n-1] - a2*y[n-2]`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Biquad {
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub a1: f64,
    pub a2: f64,
}

impl Biquad {
    /// Denominator from a digital pole and its conjugate
    fn from_pole(pole: Complex64, b: [f64; 3]) -> Self {
        Self {
            b0: b[0],
            b1: b[1],
            b2: b[2],
            a1: -2.0 * pole.re,
            a2: pole.norm_sqr(),
        }
    }

    fn scaled(mut self, gain: f64) -> Self {
        self.b0 *= gain;
        self.b1 *= gain;
        self.b2 *= gain;
        self
    }

    /// Gain at DC, `H(z = 1)`
    pub fn dc_gain(&self) -> f64 {
        (self.b0 + self.b1 + self.b2) / (1.0 + self.a1 + self.a2)
    }

    /// Magnitude response at normalized angular frequency `w` (rad/sample)
    pub fn magnitude_at(&self, w: f64) -> f64 {
        let z1 = Complex64::from_polar(1.0, -w);
        let z2 = z1 * z1;
        let num = self.b0 + z1 * self.b1 + z2 * self.b2;
        let den = 1.0 + z1 * self.a1 + z2 * self.a2;
        (num / den).norm()
    }

    /// Internal state after a constant `input` has been applied forever
    pub fn steady_state(&self, input: f64) -> [f64; 2] {
        let output = self.dc_gain() * input;
        let z2 = self.b2 * input - self.a2 * output;
        let z1 = self.b1 * input - self.a1 * output + z2;
        [z1, z2]
    }

    #[inline]
    fn step(&self, x: f64, state: &mut [f64; 2]) -> f64 {
        let y = self.b0 * x + state[0];
        state[0] = self.b1 * x - self.a1 * y + state[1];
        state[1] = self.b2 * x - self.a2 * y;
        y
    }
}

/// Left-half-plane Butterworth prototype poles with positive imaginary part
fn prototype_poles(order: usize) -> Vec<Complex64> {
    (0..order / 2)
        .map(|k| {
            let theta = PI * (2 * k + 1 + order) as f64 / (2 * order) as f64;
            Complex64::from_polar(1.0, theta)
        })
        .collect()
}

fn bilinear(pole: Complex64, fs: f64) -> Complex64 {
    let two_fs = 2.0 * fs;
    (two_fs + pole) / (two_fs - pole)
}

fn prewarp(freq: f64, fs: f64) -> f64 {
    2.0 * fs * (PI * freq / fs).tan()
}

fn check_order(order: usize) -> ProcessingResult<()> {
    if order == 0 || order % 2 != 0 {
        return Err(ProcessingError::configuration(format!(
            "filter order must be a positive even number, got {}",
            order
        )));
    }
    Ok(())
}

/// Butterworth low-pass as second-order sections, unit gain at DC
pub fn butter_lowpass(order: usize, cutoff: f64, fs: f64) -> ProcessingResult<Vec<Biquad>> {
    check_order(order)?;
    if !(cutoff > 0.0 && cutoff < 0.5 * fs) {
        return Err(ProcessingError::configuration(format!(
            "low-pass cutoff {} Hz outside (0, {}) Hz",
            cutoff,
            0.5 * fs
        )));
    }

    let warped = prewarp(cutoff, fs);
    let sections = prototype_poles(order)
        .into_iter()
        .map(|p| {
            let section = Biquad::from_pole(bilinear(p * warped, fs), [1.0, 2.0, 1.0]);
            let dc = section.dc_gain();
            section.scaled(1.0 / dc)
        })
        .collect();
    Ok(sections)
}

/// Butterworth band-pass as second-order sections, unit gain at the band centre
///
/// An order-`n` design has `n` sections, matching the conventional
/// definition where the low-pass prototype order is doubled by the transform.
pub fn butter_bandpass(order: usize, low: f64, high: f64, fs: f64) -> ProcessingResult<Vec<Biquad>> {
    check_order(order)?;
    if !(low > 0.0 && high > low && high < 0.5 * fs) {
        return Err(ProcessingError::configuration(format!(
            "band {}..{} Hz invalid for sample rate {} Hz",
            low, high, fs
        )));
    }

    let w1 = prewarp(low, fs);
    let w2 = prewarp(high, fs);
    let bandwidth = w2 - w1;
    let w0_sq = w1 * w2;
    // Digital frequency the analog centre maps to
    let center = 2.0 * (w0_sq.sqrt() / (2.0 * fs)).atan();

    let mut sections = Vec::with_capacity(order);
    for p in prototype_poles(order) {
        let p_lp = p * (bandwidth / 2.0);
        let root = (p_lp * p_lp - w0_sq).sqrt();
        for analog in [p_lp + root, p_lp - root] {
            let section = Biquad::from_pole(bilinear(analog, fs), [1.0, 0.0, -1.0]);
            let gain = section.magnitude_at(center);
            sections.push(section.scaled(1.0 / gain));
        }
    }
    Ok(sections)
}

/// Second-order IIR notch (bandwidth `freq / q`, -3 dB edges)
pub fn iir_notch(freq: f64, q: f64, fs: f64) -> ProcessingResult<Biquad> {
    if !(freq > 0.0 && freq < 0.5 * fs) || q <= 0.0 {
        return Err(ProcessingError::configuration(format!(
            "notch {} Hz (Q {}) invalid for sample rate {} Hz",
            freq, q, fs
        )));
    }
    let w0 = 2.0 * PI * freq / fs;
    let bw = w0 / q;
    let beta = (bw / 2.0).tan();
    let gain = 1.0 / (1.0 + beta);
    Ok(Biquad {
        b0: gain,
        b1: -2.0 * gain * w0.cos(),
        b2: gain,
        a1: -2.0 * gain * w0.cos(),
        a2: 2.0 * gain - 1.0,
    })
}

/// Initial cascade state for a unit step, `[section][z1, z2]`
///
/// Each section sees the DC output of the sections before it.
pub fn cascade_steady_state(sections: &[Biquad]) -> Vec<[f64; 2]> {
    let mut scale = 1.0;
    sections
        .iter()
        .map(|s| {
            let zi = s.steady_state(scale);
            scale *= s.dc_gain();
            zi
        })
        .collect()
}

/// Multichannel cascade with persistent per-channel state
#[derive(Debug, Clone)]
pub struct SosFilter {
    sections: Vec<Biquad>,
    channels: usize,
    policy: FilterResetPolicy,
    /// Indexed `[channel * sections + section]`
    state: Vec<[f64; 2]>,
}

impl SosFilter {
    pub fn new(sections: Vec<Biquad>, channels: usize, policy: FilterResetPolicy) -> Self {
        let mut filter = Self {
            state: Vec::new(),
            sections,
            channels,
            policy,
        };
        filter.reset();
        filter
    }

    pub fn sections(&self) -> &[Biquad] {
        &self.sections
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Reinitialize every channel according to the reset policy
    pub fn reset(&mut self) {
        let initial = match self.policy {
            FilterResetPolicy::SteadyState => cascade_steady_state(&self.sections),
            FilterResetPolicy::Zeroed => vec![[0.0; 2]; self.sections.len()],
        };
        self.state = (0..self.channels).flat_map(|_| initial.iter().copied()).collect();
    }

    /// Filter a chunk in place; the row count must match the filter's channel count
    pub fn process(&mut self, chunk: &mut SampleChunk) -> ProcessingResult<()> {
        if chunk.channels() != self.channels {
            return Err(eeg_core::EegError::ChannelMismatch {
                expected: self.channels,
                actual: chunk.channels(),
            }
            .into());
        }

        let n_sections = self.sections.len();
        for (ch, mut row) in chunk.data_mut().rows_mut().into_iter().enumerate() {
            let state = &mut self.state[ch * n_sections..(ch + 1) * n_sections];
            for sample in row.iter_mut() {
                let mut x = *sample as f64;
                for (section, z) in self.sections.iter().zip(state.iter_mut()) {
                    x = section.step(x, z);
                }
                *sample = x as f32;
            }
        }
        Ok(())
    }
}

/// Run a cascade over a slice with explicit initial state, returning the output
fn run_cascade(sections: &[Biquad], input: &[f64], mut state: Vec<[f64; 2]>) -> Vec<f64> {
    input
        .iter()
        .map(|&x| {
            sections
                .iter()
                .zip(state.iter_mut())
                .fold(x, |acc, (s, z)| s.step(acc, z))
        })
        .collect()
}

/// Zero-phase forward-backward filtering with odd-reflection edge padding
///
/// Padding is `3 * (2 * sections + 1)` samples, clamped to the signal length
/// minus one. Both passes start from the steady state for their first sample.
pub fn filtfilt(sections: &[Biquad], signal: &[f64]) -> Vec<f64> {
    let n = signal.len();
    if n < 2 || sections.is_empty() {
        return signal.to_vec();
    }
    let pad = (3 * (2 * sections.len() + 1)).min(n - 1);

    let first = signal[0];
    let last = signal[n - 1];
    let mut extended = Vec::with_capacity(n + 2 * pad);
    extended.extend((1..=pad).rev().map(|i| 2.0 * first - signal[i]));
    extended.extend_from_slice(signal);
    extended.extend((1..=pad).map(|i| 2.0 * last - signal[n - 1 - i]));

    let unit = cascade_steady_state(sections);
    let scaled = |x0: f64| unit.iter().map(|z| [z[0] * x0, z[1] * x0]).collect::<Vec<_>>();

    let forward = run_cascade(sections, &extended, scaled(extended[0]));
    let reversed: Vec<f64> = forward.into_iter().rev().collect();
    let backward = run_cascade(sections, &reversed, scaled(reversed[0]));

    backward.into_iter().rev().skip(pad).take(n).collect()
}

/// Notch followed by band/low-pass, as configured for one channel layout
///
/// Invalid settings disable the affected stage (pass-through); they are never
/// an error.
#[derive(Debug, Clone)]
pub struct FilterChain {
    settings: FilterSettings,
    sample_rate: f64,
    channels: usize,
    notch: Option<SosFilter>,
    band: Option<SosFilter>,
}

impl FilterChain {
    pub fn new(settings: FilterSettings, sample_rate: f64, channels: usize) -> Self {
        let mut chain = Self {
            settings,
            sample_rate,
            channels,
            notch: None,
            band: None,
        };
        chain.redesign();
        chain
    }

    pub fn settings(&self) -> &FilterSettings {
        &self.settings
    }

    pub fn is_band_active(&self) -> bool {
        self.band.is_some()
    }

    pub fn is_notch_active(&self) -> bool {
        self.notch.is_some()
    }

    pub fn set_band(&mut self, high_pass: f64, low_pass: f64) {
        self.settings.high_pass = high_pass;
        self.settings.low_pass = low_pass;
        self.band = self.design_band();
    }

    pub fn set_notch(&mut self, enabled: bool, freq: f64) {
        self.settings.notch_enabled = enabled;
        self.settings.notch_freq = freq;
        self.notch = self.design_notch();
    }

    /// Change channel count or sample rate; all state is recomputed
    pub fn reconfigure(&mut self, sample_rate: f64, channels: usize) {
        self.sample_rate = sample_rate;
        self.channels = channels;
        self.redesign();
    }

    pub fn process(&mut self, chunk: &mut SampleChunk) -> ProcessingResult<()> {
        if let Some(notch) = self.notch.as_mut() {
            notch.process(chunk)?;
        }
        if let Some(band) = self.band.as_mut() {
            band.process(chunk)?;
        }
        Ok(())
    }

    fn redesign(&mut self) {
        self.notch = self.design_notch();
        self.band = self.design_band();
    }

    fn design_band(&self) -> Option<SosFilter> {
        let s = &self.settings;
        if !s.band_is_valid(self.sample_rate) {
            info!(
                high_pass = s.high_pass,
                low_pass = s.low_pass,
                sample_rate = self.sample_rate,
                "main filter disabled"
            );
            return None;
        }
        let design = if s.high_pass == 0.0 {
            butter_lowpass(FILTER_ORDER, s.low_pass, self.sample_rate)
        } else {
            butter_bandpass(FILTER_ORDER, s.high_pass, s.low_pass, self.sample_rate)
        };
        match design {
            Ok(sections) => {
                debug!(sections = sections.len(), "main filter designed");
                Some(SosFilter::new(sections, self.channels, s.reset_policy))
            }
            Err(e) => {
                info!(error = %e, "main filter disabled");
                None
            }
        }
    }

    fn design_notch(&self) -> Option<SosFilter> {
        let s = &self.settings;
        if !s.notch_enabled {
            return None;
        }
        match iir_notch(s.notch_freq, NOTCH_Q, self.sample_rate) {
            Ok(section) => Some(SosFilter::new(vec![section], self.channels, s.reset_policy)),
            Err(e) => {
                info!(error = %e, "notch filter disabled");
                None
            }
        }
    }
}
