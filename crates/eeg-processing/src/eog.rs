//! Classifier window for eye-movement (EOG) gesture detection
//!
//! Filtered chunks are decimated toward 250 Hz, reduced to the four EOG
//! roles and buffered. When enough history is available and the recent
//! signal energy crosses a threshold, a zero-phase filtered, z-scored
//! two-row window (`h = right - left`, `v = up - down`) is produced for an
//! external [`GestureClassifier`]. [`PredictionGate`] then applies the
//! confidence, fixation and rebound rules to the classifier output.
//!
//! Nothing here runs inside the processing service. Callers that own a
//! classifier feed [`EogDetector`] from `ProcessorEvent::Filtered`.

use crate::config::{FILTER_ORDER, NOTCH_Q};
use crate::error::ProcessingResult;
use crate::filters::{butter_lowpass, filtfilt, iir_notch, Biquad};
use eeg_core::{EogChannelMap, SampleChunk};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const TARGET_SAMPLE_RATE: f32 = 250.0;
pub const WINDOW_SAMPLES: usize = 250;
/// Extra samples on each side absorbed by zero-phase filtering
pub const FILTER_PADDING: usize = 16;
pub const ENERGY_WINDOW: usize = 50;
/// Max per-channel std (µV) over the energy window that triggers a window
pub const TRIGGER_THRESHOLD: f32 = 20.0;
pub const MAX_BUFFERED: usize = 1000;
pub const COOLDOWN: Duration = Duration::from_millis(400);
pub const REBOUND_WINDOW: Duration = Duration::from_millis(600);
pub const CONFIDENCE_THRESHOLD: f32 = 0.85;

const MAINS_HZ: f64 = 50.0;
const EOG_LOWPASS_HZ: f64 = 12.0;

/// Classifier output classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Gesture {
    Up,
    Down,
    Left,
    Right,
    BlinkOnce,
    BlinkTwice,
    BlinkThree,
    Fixation,
}

impl Gesture {
    /// Class order of the classifier's output vector
    pub const CLASSES: [Gesture; 8] = [
        Gesture::Up,
        Gesture::Down,
        Gesture::Left,
        Gesture::Right,
        Gesture::BlinkOnce,
        Gesture::BlinkTwice,
        Gesture::BlinkThree,
        Gesture::Fixation,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Gesture::Up => "up",
            Gesture::Down => "down",
            Gesture::Left => "left",
            Gesture::Right => "right",
            Gesture::BlinkOnce => "blink_once",
            Gesture::BlinkTwice => "blink_twice",
            Gesture::BlinkThree => "blink_three",
            Gesture::Fixation => "fixation",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim().to_lowercase();
        Self::CLASSES.into_iter().find(|g| g.label() == label)
    }

    pub fn is_blink(&self) -> bool {
        matches!(self, Gesture::BlinkOnce | Gesture::BlinkTwice | Gesture::BlinkThree)
    }

    pub fn opposite(&self) -> Option<Gesture> {
        match self {
            Gesture::Up => Some(Gesture::Down),
            Gesture::Down => Some(Gesture::Up),
            Gesture::Left => Some(Gesture::Right),
            Gesture::Right => Some(Gesture::Left),
            _ => None,
        }
    }
}

impl fmt::Display for Gesture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// `[2][WINDOW_SAMPLES]` z-scored input: row 0 horizontal, row 1 vertical
#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierWindow {
    data: Array2<f32>,
}

impl ClassifierWindow {
    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn horizontal(&self) -> ndarray::ArrayView1<'_, f32> {
        self.data.row(0)
    }

    pub fn vertical(&self) -> ndarray::ArrayView1<'_, f32> {
        self.data.row(1)
    }
}

/// External gesture model
pub trait GestureClassifier: Send {
    fn classify(&mut self, window: &ClassifierWindow) -> (Gesture, f32);
}

/// Decimates, buffers and cuts classifier windows
pub struct EogWindowBuilder {
    roles: EogChannelMap,
    step: usize,
    phase: usize,
    buffer: VecDeque<[f32; 4]>,
    last_prediction: Option<Instant>,
    notch: Biquad,
    lowpass: Vec<Biquad>,
}

impl EogWindowBuilder {
    pub fn new(roles: EogChannelMap, input_rate: f32) -> ProcessingResult<Self> {
        let fs = TARGET_SAMPLE_RATE as f64;
        Ok(Self {
            roles,
            step: downsample_step(input_rate),
            phase: 0,
            buffer: VecDeque::with_capacity(MAX_BUFFERED),
            last_prediction: None,
            notch: iir_notch(MAINS_HZ, NOTCH_Q, fs)?,
            lowpass: butter_lowpass(FILTER_ORDER, EOG_LOWPASS_HZ, fs)?,
        })
    }

    pub fn step(&self) -> usize {
        self.step
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn set_input_rate(&mut self, rate: f32) {
        if rate <= 0.0 {
            return;
        }
        self.step = downsample_step(rate);
        self.phase = 0;
        info!(rate, step = self.step, "EOG input rate changed");
    }

    pub fn set_roles(&mut self, roles: EogChannelMap) {
        self.roles = roles;
        self.clear();
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Start the cooldown from `at`
    pub fn mark_prediction(&mut self, at: Instant) {
        self.last_prediction = Some(at);
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.phase = 0;
        self.last_prediction = None;
    }

    /// Buffer `chunk` and return a window if one is due at `now`
    pub fn push(&mut self, chunk: &SampleChunk, now: Instant) -> Option<ClassifierWindow> {
        let indices = self.roles.indices();
        if indices.iter().any(|&i| i >= chunk.channels()) {
            warn!(channels = chunk.channels(), "EOG roles outside chunk, skipping");
            return None;
        }

        let frames = chunk.frames();
        let data = chunk.data();
        let mut i = self.phase;
        while i < frames {
            let sample = indices.map(|ch| data[[ch, i]]);
            if self.buffer.len() == MAX_BUFFERED {
                self.buffer.pop_front();
            }
            self.buffer.push_back(sample);
            i += self.step;
        }
        self.phase = i - frames;

        let cooled = self
            .last_prediction
            .map_or(true, |at| now.saturating_duration_since(at) > COOLDOWN);
        if cooled {
            self.try_window()
        } else {
            None
        }
    }

    fn try_window(&self) -> Option<ClassifierWindow> {
        let required = WINDOW_SAMPLES + 2 * FILTER_PADDING;
        if self.buffer.len() < required {
            return None;
        }

        let recent = self.buffer.len() - ENERGY_WINDOW;
        let energy = (0..4)
            .map(|ch| std_dev(self.buffer.range(recent..).map(|s| s[ch] as f64)))
            .fold(0.0f64, f64::max);
        if energy <= TRIGGER_THRESHOLD as f64 {
            return None;
        }
        debug!(energy, "EOG event detected");

        let start = self.buffer.len() - required;
        let clean: Vec<Vec<f64>> = (0..4)
            .map(|ch| {
                let raw: Vec<f64> = self.buffer.range(start..).map(|s| s[ch] as f64).collect();
                let notched = filtfilt(std::slice::from_ref(&self.notch), &raw);
                let lowpassed = filtfilt(&self.lowpass, &notched);
                lowpassed[FILTER_PADDING..FILTER_PADDING + WINDOW_SAMPLES].to_vec()
            })
            .collect();

        // Role order is [up, down, left, right]
        let h: Vec<f64> = clean[3].iter().zip(&clean[2]).map(|(r, l)| r - l).collect();
        let v: Vec<f64> = clean[0].iter().zip(&clean[1]).map(|(u, d)| u - d).collect();

        let mut data = Array2::<f32>::zeros((2, WINDOW_SAMPLES));
        for (row, signal) in [h, v].into_iter().enumerate() {
            for (dst, x) in data.row_mut(row).iter_mut().zip(z_score(&signal)) {
                *dst = x as f32;
            }
        }
        Some(ClassifierWindow { data })
    }
}

fn downsample_step(rate: f32) -> usize {
    ((rate / TARGET_SAMPLE_RATE).round() as usize).max(1)
}

fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count();
    if n == 0 {
        return 0.0;
    }
    let mean = values.clone().sum::<f64>() / n as f64;
    (values.map(|x| (x - mean) * (x - mean)).sum::<f64>() / n as f64).sqrt()
}

/// Mean-centre and divide by the population std; mean-only below 1e-6
fn z_score(signal: &[f64]) -> Vec<f64> {
    let std = std_dev(signal.iter().copied());
    let mean = signal.iter().sum::<f64>() / signal.len().max(1) as f64;
    if std > 1e-6 {
        signal.iter().map(|x| (x - mean) / std).collect()
    } else {
        signal.iter().map(|x| x - mean).collect()
    }
}

/// What the gate did with one classifier output
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// Below the confidence threshold, or fixation
    Rejected,
    Accepted(Gesture),
    /// Opposite of the previous direction, too soon after it
    Rebound(Gesture),
}

/// Confidence threshold plus rebound suppression
#[derive(Debug, Clone)]
pub struct PredictionGate {
    threshold: f32,
    last_direction: Option<(Gesture, Instant)>,
}

impl Default for PredictionGate {
    fn default() -> Self {
        Self::new(CONFIDENCE_THRESHOLD)
    }
}

impl PredictionGate {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last_direction: None,
        }
    }

    pub fn reset(&mut self) {
        self.last_direction = None;
    }

    pub fn evaluate(&mut self, gesture: Gesture, confidence: f32, now: Instant) -> GateDecision {
        if confidence < self.threshold || gesture == Gesture::Fixation {
            return GateDecision::Rejected;
        }
        if gesture.is_blink() {
            self.last_direction = None;
            return GateDecision::Accepted(gesture);
        }
        if let Some((last, at)) = self.last_direction {
            if last.opposite() == Some(gesture) && now.saturating_duration_since(at) < REBOUND_WINDOW {
                debug!(%gesture, previous = %last, "rebound suppressed");
                return GateDecision::Rebound(gesture);
            }
        }
        self.last_direction = Some((gesture, now));
        GateDecision::Accepted(gesture)
    }
}

/// Builder, classifier and gate chained for one stream
pub struct EogDetector<C> {
    builder: EogWindowBuilder,
    classifier: C,
    gate: PredictionGate,
}

impl<C: GestureClassifier> EogDetector<C> {
    pub fn new(builder: EogWindowBuilder, classifier: C) -> Self {
        Self {
            builder,
            classifier,
            gate: PredictionGate::default(),
        }
    }

    pub fn builder_mut(&mut self) -> &mut EogWindowBuilder {
        &mut self.builder
    }

    pub fn reset(&mut self) {
        self.builder.reset();
        self.gate.reset();
    }

    /// Feed one filtered chunk; returns an accepted gesture
    pub fn push(&mut self, chunk: &SampleChunk, now: Instant) -> Option<Gesture> {
        let window = self.builder.push(chunk, now)?;
        let (gesture, confidence) = self.classifier.classify(&window);
        match self.gate.evaluate(gesture, confidence, now) {
            GateDecision::Rejected => None,
            GateDecision::Rebound(_) => {
                self.builder.clear();
                None
            }
            GateDecision::Accepted(gesture) => {
                info!(%gesture, confidence, "gesture accepted");
                self.builder.mark_prediction(now);
                self.builder.clear();
                Some(gesture)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles() -> EogChannelMap {
        EogChannelMap::from_names(&["EOG Left", "EOG Right", "EOG Up", "EOG Down"]).unwrap()
    }

    /// 4 channels at 250 Hz; the up channel carries a step of `amplitude`
    fn saccade(frames: usize, step_at: usize, amplitude: f32) -> SampleChunk {
        let mut chunk = SampleChunk::zeros(4, frames);
        for i in step_at..frames {
            chunk.data_mut()[[2, i]] = amplitude;
        }
        chunk
    }

    #[test]
    fn test_downsample_step() {
        assert_eq!(downsample_step(1000.0), 4);
        assert_eq!(downsample_step(250.0), 1);
        assert_eq!(downsample_step(100.0), 1);
        assert_eq!(downsample_step(500.0), 2);
    }

    #[test]
    fn test_decimation_keeps_phase_across_chunks() {
        let mut builder = EogWindowBuilder::new(roles(), 1000.0).unwrap();
        let now = Instant::now();
        let ramp = |start: usize, frames: usize| {
            let mut chunk = SampleChunk::zeros(4, frames);
            for i in 0..frames {
                chunk.data_mut()[[2, i]] = (start + i) as f32;
            }
            chunk
        };
        builder.push(&ramp(0, 6), now);
        builder.push(&ramp(6, 7), now);
        builder.push(&ramp(13, 3), now);
        let ups: Vec<f32> = builder.buffer.iter().map(|s| s[0]).collect();
        assert_eq!(ups, vec![0.0, 4.0, 8.0, 12.0]);
    }

    #[test]
    fn test_buffer_is_bounded() {
        let mut builder = EogWindowBuilder::new(roles(), 250.0).unwrap();
        builder.push(&SampleChunk::zeros(4, 1500), Instant::now());
        assert_eq!(builder.buffered(), MAX_BUFFERED);
    }

    #[test]
    fn test_quiet_signal_yields_nothing() {
        let mut builder = EogWindowBuilder::new(roles(), 250.0).unwrap();
        assert!(builder.push(&SampleChunk::zeros(4, 400), Instant::now()).is_none());
    }

    #[test]
    fn test_short_history_yields_nothing() {
        let mut builder = EogWindowBuilder::new(roles(), 250.0).unwrap();
        assert!(builder.push(&saccade(200, 180, 200.0), Instant::now()).is_none());
    }

    #[test]
    fn test_saccade_produces_normalized_window() {
        let mut builder = EogWindowBuilder::new(roles(), 250.0).unwrap();
        let window = builder.push(&saccade(400, 375, 200.0), Instant::now()).unwrap();
        assert_eq!(window.data().dim(), (2, WINDOW_SAMPLES));

        let v: Vec<f32> = window.vertical().to_vec();
        let mean = v.iter().sum::<f32>() / v.len() as f32;
        let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f32>() / v.len() as f32;
        assert!(mean.abs() < 1e-4);
        assert!((var.sqrt() - 1.0).abs() < 1e-3);
        // Only the vertical pair moved; horizontal is flat, hence mean-only
        assert!(window.horizontal().iter().all(|x| x.abs() < 1e-6));
    }

    #[test]
    fn test_cooldown_blocks_new_windows() {
        let mut builder = EogWindowBuilder::new(roles(), 250.0).unwrap();
        let t0 = Instant::now();
        builder.mark_prediction(t0);
        assert!(builder.push(&saccade(400, 375, 200.0), t0 + Duration::from_millis(100)).is_none());
        assert!(builder
            .push(&SampleChunk::zeros(4, 0), t0 + Duration::from_millis(500))
            .is_some());
    }

    #[test]
    fn test_gate_rules() {
        let t0 = Instant::now();
        let mut gate = PredictionGate::default();
        assert_eq!(gate.evaluate(Gesture::Up, 0.5, t0), GateDecision::Rejected);
        assert_eq!(gate.evaluate(Gesture::Fixation, 0.99, t0), GateDecision::Rejected);
        assert_eq!(gate.evaluate(Gesture::Up, 0.9, t0), GateDecision::Accepted(Gesture::Up));
        assert_eq!(
            gate.evaluate(Gesture::Down, 0.9, t0 + Duration::from_millis(300)),
            GateDecision::Rebound(Gesture::Down)
        );
        assert_eq!(
            gate.evaluate(Gesture::Left, 0.9, t0 + Duration::from_millis(300)),
            GateDecision::Accepted(Gesture::Left)
        );
        assert_eq!(
            gate.evaluate(Gesture::Right, 0.9, t0 + Duration::from_millis(1000)),
            GateDecision::Accepted(Gesture::Right)
        );
    }

    #[test]
    fn test_blink_unlocks_rebound() {
        let t0 = Instant::now();
        let mut gate = PredictionGate::default();
        gate.evaluate(Gesture::Left, 0.9, t0);
        gate.evaluate(Gesture::BlinkTwice, 0.9, t0 + Duration::from_millis(100));
        assert_eq!(
            gate.evaluate(Gesture::Right, 0.9, t0 + Duration::from_millis(200)),
            GateDecision::Accepted(Gesture::Right)
        );
    }

    #[test]
    fn test_labels() {
        assert_eq!(Gesture::from_label("Blink_Twice"), Some(Gesture::BlinkTwice));
        assert_eq!(Gesture::from_label("sideways"), None);
        assert_eq!(Gesture::Up.opposite(), Some(Gesture::Down));
        assert_eq!(Gesture::BlinkOnce.opposite(), None);
    }

    struct Scripted(Vec<(Gesture, f32)>);

    impl GestureClassifier for Scripted {
        fn classify(&mut self, _: &ClassifierWindow) -> (Gesture, f32) {
            self.0.remove(0)
        }
    }

    #[test]
    fn test_detector_clears_after_accept() {
        let builder = EogWindowBuilder::new(roles(), 250.0).unwrap();
        let mut detector = EogDetector::new(builder, Scripted(vec![(Gesture::Up, 0.95)]));
        let t0 = Instant::now();
        assert_eq!(detector.push(&saccade(400, 375, 200.0), t0), Some(Gesture::Up));
        assert_eq!(detector.builder_mut().buffered(), 0);
    }
}
