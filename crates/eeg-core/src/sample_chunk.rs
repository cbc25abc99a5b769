//! Time-ordered multichannel sample matrix

use crate::error::{EegError, EegResult};
use ndarray::{concatenate, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

/// Block of physical-unit (µV) samples laid out `[channels][frames]`
///
/// Produced per decoded packet, and by the processor after concatenating
/// every chunk queued since the previous tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleChunk {
    data: Array2<f32>,
}

impl SampleChunk {
    pub fn new(data: Array2<f32>) -> Self {
        Self { data }
    }

    /// All-zero chunk with the given dimensions
    pub fn zeros(channels: usize, frames: usize) -> Self {
        Self {
            data: Array2::zeros((channels, frames)),
        }
    }

    /// Build from one vector per channel; every row must have the same length
    pub fn from_rows(rows: Vec<Vec<f32>>) -> EegResult<Self> {
        let channels = rows.len();
        let frames = rows.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = rows.iter().find(|r| r.len() != frames) {
            return Err(EegError::shape(format!(
                "ragged rows: expected {} frames, found {}",
                frames,
                bad.len()
            )));
        }
        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        let data = Array2::from_shape_vec((channels, frames), flat)
            .map_err(|e| EegError::shape(e.to_string()))?;
        Ok(Self { data })
    }

    /// Concatenate chunks along the time axis, `None` for an empty slice
    pub fn concat(chunks: &[SampleChunk]) -> EegResult<Option<SampleChunk>> {
        let Some(first) = chunks.first() else {
            return Ok(None);
        };
        if chunks.len() == 1 {
            return Ok(Some(first.clone()));
        }
        let expected = first.channels();
        if let Some(bad) = chunks.iter().find(|c| c.channels() != expected) {
            return Err(EegError::ChannelMismatch {
                expected,
                actual: bad.channels(),
            });
        }
        let views: Vec<ArrayView2<f32>> = chunks.iter().map(|c| c.data.view()).collect();
        let data = concatenate(Axis(1), &views).map_err(|e| EegError::shape(e.to_string()))?;
        Ok(Some(SampleChunk { data }))
    }

    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    /// Number of sample instants (the chunk width)
    pub fn frames(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Payload size as 32-bit floats, used for throughput accounting
    pub fn nbytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }

    pub fn row(&self, channel: usize) -> ArrayView1<'_, f32> {
        self.data.row(channel)
    }

    pub fn data(&self) -> &Array2<f32> {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Array2<f32> {
        &mut self.data
    }

    pub fn into_inner(self) -> Array2<f32> {
        self.data
    }
}

impl From<Array2<f32>> for SampleChunk {
    fn from(data: Array2<f32>) -> Self {
        Self::new(data)
    }
}
