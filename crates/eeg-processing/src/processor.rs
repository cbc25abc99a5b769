//! Streaming processor: queue, filter chain, artifact removal, recording, spectrum
//!
//! Synchronous core driven by two clocks: [`StreamingProcessor::tick`] drains
//! the inbound queue and [`StreamingProcessor::spectrum_tick`] computes band
//! powers. The async [`crate::service::ProcessingService`] owns one of
//! these and calls both from its timers.

use crate::artifact::{ArtifactModel, ArtifactRemover, CleanOutcome, PassReason};
use crate::config::ProcessorSettings;
use crate::error::{ProcessingError, ProcessingResult};
use crate::filters::FilterChain;
use crate::recording::RecordingSession;
use crate::ring::{DisplayBuffer, SampleRing};
use crate::spectrum::{Spectrum, SpectrumAnalyzer};
use eeg_core::{
    default_channel_names, validate_channel_count, validate_sample_rate, Marker, RecordingPayload,
    SampleChunk,
};
use ndarray::Array2;
use std::collections::VecDeque;
use tracing::{debug, info, warn};

/// Result of offering a chunk to the inbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkAdmission {
    Queued,
    /// Channel count disagrees with the configured count
    Dropped { expected: usize, actual: usize },
}

/// Packets and payload bytes processed since the previous spectrum tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Throughput {
    pub packets: u64,
    pub bytes: u64,
}

/// Output of one spectrum tick
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumReport {
    pub spectrum: Spectrum,
    pub throughput: Throughput,
}

pub struct StreamingProcessor {
    settings: ProcessorSettings,
    sample_rate: f32,
    channels: usize,
    channel_names: Vec<String>,
    queue: VecDeque<SampleChunk>,
    filters: FilterChain,
    remover: ArtifactRemover,
    calibration: Option<Vec<SampleChunk>>,
    recording: Option<RecordingSession>,
    fft_ring: SampleRing,
    analyzer: SpectrumAnalyzer,
    display: DisplayBuffer,
    throughput: Throughput,
    overflow_drops: u64,
    mismatch_drops: u64,
}

impl StreamingProcessor {
    pub fn new(settings: ProcessorSettings, channels: usize, sample_rate: f32) -> ProcessingResult<Self> {
        settings.validate()?;
        validate_channel_count(channels)?;
        validate_sample_rate(sample_rate)?;

        let fft_len = fft_len(sample_rate, settings.fft_window_secs);
        Ok(Self {
            filters: FilterChain::new(settings.filters.clone(), sample_rate as f64, channels),
            queue: VecDeque::with_capacity(settings.max_queued_chunks),
            fft_ring: SampleRing::new(channels, fft_len),
            analyzer: SpectrumAnalyzer::new(fft_len, sample_rate)?,
            display: DisplayBuffer::new(channels, settings.display_samples, settings.display_downsample),
            channel_names: default_channel_names(channels),
            remover: ArtifactRemover::new(),
            calibration: None,
            recording: None,
            throughput: Throughput::default(),
            overflow_drops: 0,
            mismatch_drops: 0,
            settings,
            sample_rate,
            channels,
        })
    }

    pub fn settings(&self) -> &ProcessorSettings {
        &self.settings
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn filters(&self) -> &FilterChain {
        &self.filters
    }

    pub fn remover(&self) -> &ArtifactRemover {
        &self.remover
    }

    /// Chunks dropped as (overflow, channel mismatch)
    pub fn dropped(&self) -> (u64, u64) {
        (self.overflow_drops, self.mismatch_drops)
    }

    /// Offer a decoded chunk; the oldest queued chunk is discarded when full
    pub fn enqueue(&mut self, chunk: SampleChunk) -> ChunkAdmission {
        if chunk.channels() != self.channels {
            warn!(
                expected = self.channels,
                actual = chunk.channels(),
                "dropping chunk with mismatched channel count"
            );
            self.mismatch_drops += 1;
            return ChunkAdmission::Dropped {
                expected: self.channels,
                actual: chunk.channels(),
            };
        }
        if self.queue.len() >= self.settings.max_queued_chunks {
            self.queue.pop_front();
            self.overflow_drops += 1;
            debug!(queued = self.queue.len(), "inbound queue full, discarding oldest chunk");
        }
        self.queue.push_back(chunk);
        ChunkAdmission::Queued
    }

    /// Samples admitted but not yet processed
    pub fn pending_samples(&self) -> u64 {
        self.queue.iter().map(|c| c.frames() as u64).sum()
    }

    /// Drain the queue and run it through the pipeline; returns the final chunk
    pub fn tick(&mut self) -> Option<SampleChunk> {
        if self.queue.is_empty() {
            return None;
        }
        let drained: Vec<SampleChunk> = self.queue.drain(..).collect();
        let mut chunk = match SampleChunk::concat(&drained) {
            Ok(Some(chunk)) => chunk,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "could not aggregate queued chunks, dropping them");
                return None;
            }
        };
        self.throughput.packets += drained.len() as u64;
        self.throughput.bytes += chunk.nbytes() as u64;

        if let Err(e) = self.filters.process(&mut chunk) {
            warn!(error = %e, "filter chain rejected chunk, passing through");
        }

        let final_chunk = if let Some(buffer) = self.calibration.as_mut() {
            buffer.push(chunk.clone());
            chunk
        } else {
            match self.remover.clean(chunk) {
                CleanOutcome::Cleaned(cleaned) => cleaned,
                CleanOutcome::PassThrough { chunk, reason } => {
                    if let PassReason::Failed(msg) = &reason {
                        debug!(reason = %msg, "artifact removal bypassed");
                    }
                    chunk
                }
            }
        };

        if let Some(session) = self.recording.as_mut() {
            session.append(final_chunk.clone());
        }
        self.fft_ring.push(&final_chunk);
        self.display.push(&final_chunk);
        Some(final_chunk)
    }

    /// Spectrum of the ring buffer plus throughput since the previous call; counters reset
    pub fn spectrum_tick(&mut self) -> ProcessingResult<SpectrumReport> {
        let spectrum = self.analyzer.analyze(&self.fft_ring)?;
        let throughput = std::mem::take(&mut self.throughput);
        Ok(SpectrumReport {
            spectrum,
            throughput,
        })
    }

    /// Zero the throughput counters, e.g. on disconnect
    pub fn reset_counters(&mut self) {
        self.throughput = Throughput::default();
    }

    /// Clear queued input, spectral and display history before a new stream
    pub fn reset_stream(&mut self) {
        self.queue.clear();
        self.fft_ring.clear();
        self.display.clear();
        self.throughput = Throughput::default();
    }

    pub fn display_snapshot(&self) -> Array2<f32> {
        self.display.snapshot()
    }

    // --- recording ---

    pub fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Begin a fresh recording; an active one is discarded
    pub fn start_recording(&mut self) {
        if self.recording.is_some() {
            warn!("recording restarted, discarding previous buffer");
        }
        self.recording = Some(RecordingSession::new());
        info!("recording started");
    }

    /// Process everything still queued, then finalize
    ///
    /// Returns the chunk that flushing the queue produced alongside the
    /// payload. The payload is `None` when no recording was active or no
    /// samples arrived.
    pub fn stop_recording(&mut self) -> ProcessingResult<(Option<SampleChunk>, Option<RecordingPayload>)> {
        if self.recording.is_none() {
            return Ok((None, None));
        }
        let flushed = self.tick();
        let Some(session) = self.recording.take() else {
            return Ok((flushed, None));
        };
        let samples = session.recorded_samples();
        let payload = session.finalize(self.sample_rate, self.channel_names.clone())?;
        info!(samples, empty = payload.is_none(), "recording stopped");
        Ok((flushed, payload))
    }

    /// Marker at `recorded + queued` samples; ignored unless recording
    pub fn add_marker(&mut self, label: impl Into<String>) -> Option<Marker> {
        let pending = self.pending_samples();
        self.recording.as_mut().map(|s| s.mark(label, pending))
    }

    // --- calibration and artifact removal ---

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// Returns `false` if a calibration is already running
    pub fn start_calibration(&mut self) -> bool {
        if self.calibration.is_some() {
            return false;
        }
        info!("artifact calibration started");
        self.calibration = Some(Vec::new());
        true
    }

    /// End calibration and return the concatenated buffer, if any samples arrived
    pub fn finish_calibration(&mut self) -> Option<SampleChunk> {
        let buffer = self.calibration.take()?;
        info!(chunks = buffer.len(), "artifact calibration finished");
        match SampleChunk::concat(&buffer) {
            Ok(chunk) => chunk.filter(|c| c.frames() > 0),
            Err(e) => {
                warn!(error = %e, "calibration buffer inconsistent, discarding");
                None
            }
        }
    }

    /// Swap in a new model; it must match the current channel layout
    pub fn install_model(&mut self, model: ArtifactModel) -> ProcessingResult<()> {
        if model.channel_count() != self.channels {
            return Err(ProcessingError::artifact(format!(
                "model covers {} channels, processor has {}",
                model.channel_count(),
                self.channels
            )));
        }
        self.remover.install(model);
        Ok(())
    }

    pub fn set_artifact_removal(&mut self, enabled: bool) -> bool {
        self.remover.set_enabled(enabled)
    }

    // --- reconfiguration ---

    /// New channel layout: filter state, rings and names are rebuilt, queued data discarded
    pub fn set_channel_count(&mut self, channels: usize) -> ProcessingResult<()> {
        validate_channel_count(channels)?;
        if channels == self.channels && self.channel_names.len() == channels {
            return Ok(());
        }
        info!(from = self.channels, to = channels, "reconfiguring channel count");
        self.channels = channels;
        self.channel_names = default_channel_names(channels);
        self.queue.clear();
        self.filters.reconfigure(self.sample_rate as f64, channels);
        self.fft_ring = SampleRing::new(channels, self.analyzer.len());
        self.display = DisplayBuffer::new(
            channels,
            self.settings.display_samples,
            self.settings.display_downsample,
        );
        if self.calibration.is_some() {
            warn!("channel count changed during calibration, restarting buffer");
            self.calibration = Some(Vec::new());
        }
        Ok(())
    }

    /// New sample rate: filters redesigned, FFT length recomputed
    pub fn set_sample_rate(&mut self, sample_rate: f32) -> ProcessingResult<()> {
        validate_sample_rate(sample_rate)?;
        if sample_rate == self.sample_rate {
            return Ok(());
        }
        info!(from = self.sample_rate, to = sample_rate, "sample rate changed");
        let len = fft_len(sample_rate, self.settings.fft_window_secs);
        self.analyzer = SpectrumAnalyzer::new(len, sample_rate)?;
        self.fft_ring = SampleRing::new(self.channels, len);
        self.sample_rate = sample_rate;
        self.filters.reconfigure(sample_rate as f64, self.channels);
        Ok(())
    }

    pub fn set_filter_band(&mut self, high_pass: f64, low_pass: f64) {
        self.settings.filters.high_pass = high_pass;
        self.settings.filters.low_pass = low_pass;
        self.filters.set_band(high_pass, low_pass);
    }

    pub fn set_notch(&mut self, enabled: bool, freq: f64) {
        self.settings.filters.notch_enabled = enabled;
        self.settings.filters.notch_freq = freq;
        self.filters.set_notch(enabled, freq);
    }

    /// Replace all names; ignored when the count does not match
    pub fn set_channel_names(&mut self, names: Vec<String>) -> bool {
        if names.len() != self.channels {
            warn!(given = names.len(), channels = self.channels, "ignoring channel names");
            return false;
        }
        self.channel_names = names;
        true
    }

    pub fn rename_channel(&mut self, index: usize, name: impl Into<String>) -> bool {
        match self.channel_names.get_mut(index) {
            Some(slot) => {
                *slot = name.into();
                true
            }
            None => false,
        }
    }
}

fn fft_len(sample_rate: f32, window_secs: f64) -> usize {
    ((sample_rate as f64 * window_secs).round() as usize).max(2)
}
