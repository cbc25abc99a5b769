//! Recording payload exchanged with persistence

use crate::error::{EegError, EegResult};
use crate::sample_chunk::SampleChunk;
use serde::{Deserialize, Serialize};

/// Event label pinned to a sample offset within a recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marker {
    pub sample_index: u64,
    pub label: String,
}

impl Marker {
    pub fn new(sample_index: u64, label: impl Into<String>) -> Self {
        Self {
            sample_index,
            label: label.into(),
        }
    }
}

/// Finalized recording handed to a [`RecordingStore`]
///
/// Markers are stored as two parallel columns so the shape matches what
/// reloading returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingPayload {
    pub data: SampleChunk,
    pub sample_rate: f32,
    pub channel_names: Vec<String>,
    pub marker_timestamps: Vec<u64>,
    pub marker_labels: Vec<String>,
}

impl RecordingPayload {
    pub fn new(
        data: SampleChunk,
        sample_rate: f32,
        channel_names: Vec<String>,
        markers: &[Marker],
    ) -> EegResult<Self> {
        let payload = Self {
            data,
            sample_rate,
            channel_names,
            marker_timestamps: markers.iter().map(|m| m.sample_index).collect(),
            marker_labels: markers.iter().map(|m| m.label.clone()).collect(),
        };
        payload.validate()?;
        Ok(payload)
    }

    /// Check internal consistency, used after reload as well
    pub fn validate(&self) -> EegResult<()> {
        if self.channel_names.len() != self.data.channels() {
            return Err(EegError::InvalidPayload {
                reason: format!(
                    "{} channel names for {} data rows",
                    self.channel_names.len(),
                    self.data.channels()
                ),
            });
        }
        if self.marker_timestamps.len() != self.marker_labels.len() {
            return Err(EegError::InvalidPayload {
                reason: "marker timestamp and label counts differ".to_string(),
            });
        }
        Ok(())
    }

    pub fn markers(&self) -> impl Iterator<Item = Marker> + '_ {
        self.marker_timestamps
            .iter()
            .zip(self.marker_labels.iter())
            .map(|(&ts, label)| Marker::new(ts, label.clone()))
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate <= 0.0 {
            return 0.0;
        }
        self.data.frames() as f64 / self.sample_rate as f64
    }
}

/// Persistence collaborator: accepts a payload on completion and returns the same shape on reload
pub trait RecordingStore {
    type Error: std::error::Error + Send + Sync + 'static;

    fn save(&self, payload: &RecordingPayload) -> Result<(), Self::Error>;

    fn load(&self) -> Result<RecordingPayload, Self::Error>;
}
