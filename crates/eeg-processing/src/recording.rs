//! Recording buffer and marker bookkeeping

use eeg_core::{EegResult, Marker, RecordingPayload, SampleChunk};
use tracing::info;

/// Accumulates processed chunks and markers between start and stop
#[derive(Debug, Clone, Default)]
pub struct RecordingSession {
    chunks: Vec<SampleChunk>,
    markers: Vec<Marker>,
    recorded_samples: u64,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a processed chunk and advance the sample counter by its width
    pub fn append(&mut self, chunk: SampleChunk) {
        self.recorded_samples += chunk.frames() as u64;
        self.chunks.push(chunk);
    }

    /// Pin a marker `pending` samples past what has been recorded so far
    pub fn mark(&mut self, label: impl Into<String>, pending: u64) -> Marker {
        let marker = Marker::new(self.recorded_samples + pending, label);
        info!(label = %marker.label, sample = marker.sample_index, "marker added");
        self.markers.push(marker.clone());
        marker
    }

    pub fn recorded_samples(&self) -> u64 {
        self.recorded_samples
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Concatenate everything recorded; `None` when no samples arrived
    pub fn finalize(
        self,
        sample_rate: f32,
        channel_names: Vec<String>,
    ) -> EegResult<Option<RecordingPayload>> {
        let Some(data) = SampleChunk::concat(&self.chunks)? else {
            return Ok(None);
        };
        if data.frames() == 0 {
            return Ok(None);
        }
        RecordingPayload::new(data, sample_rate, channel_names, &self.markers).map(Some)
    }
}
