//! JSON persistence of finished recordings

use chrono::{DateTime, Local};
use eeg_core::{EegError, RecordingPayload, RecordingStore};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("recording file I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("recording file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Payload(#[from] EegError),
}

pub struct JsonRecordingStore {
    path: PathBuf,
}

impl JsonRecordingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `recording_YYYYmmdd_HHMMSS.json` inside `dir`
    pub fn timestamped(dir: &Path, at: DateTime<Local>) -> Self {
        Self::new(dir.join(format!("recording_{}.json", at.format("%Y%m%d_%H%M%S"))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RecordingStore for JsonRecordingStore {
    type Error = StoreError;

    fn save(&self, payload: &RecordingPayload) -> Result<(), StoreError> {
        payload.validate()?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let writer = BufWriter::new(File::create(&self.path)?);
        serde_json::to_writer(writer, payload)?;
        info!(
            path = %self.path.display(),
            channels = payload.data.channels(),
            samples = payload.data.frames(),
            markers = payload.marker_labels.len(),
            "recording saved"
        );
        Ok(())
    }

    fn load(&self) -> Result<RecordingPayload, StoreError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let payload: RecordingPayload = serde_json::from_reader(reader)?;
        payload.validate()?;
        Ok(payload)
    }
}
