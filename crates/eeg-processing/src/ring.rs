//! Fixed-length circular sample buffers feeding the spectrum and display sinks

use eeg_core::SampleChunk;
use ndarray::{s, Array2};

/// Fixed-length circular buffer holding the most recent samples per channel
#[derive(Debug, Clone)]
pub struct SampleRing {
    data: Array2<f32>,
    ptr: usize,
}

impl SampleRing {
    pub fn new(channels: usize, len: usize) -> Self {
        Self {
            data: Array2::zeros((channels, len)),
            ptr: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.data.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.data.ncols() == 0
    }

    pub fn channels(&self) -> usize {
        self.data.nrows()
    }

    pub fn clear(&mut self) {
        self.data.fill(0.0);
        self.ptr = 0;
    }

    /// Write a chunk, wrapping around; only the newest `len` samples of a long chunk are kept
    pub fn push(&mut self, chunk: &SampleChunk) {
        let len = self.len();
        if len == 0 || chunk.channels() != self.channels() {
            return;
        }
        let src = chunk.data();
        let n = src.ncols();
        let (src, n) = if n > len {
            (src.slice(s![.., n - len..]), len)
        } else {
            (src.view(), n)
        };

        let first = (len - self.ptr).min(n);
        self.data
            .slice_mut(s![.., self.ptr..self.ptr + first])
            .assign(&src.slice(s![.., ..first]));
        if first < n {
            self.data
                .slice_mut(s![.., ..n - first])
                .assign(&src.slice(s![.., first..]));
        }
        self.ptr = (self.ptr + n) % len;
    }

    /// Contents oldest to newest
    pub fn linearized(&self) -> Array2<f32> {
        let len = self.len();
        let mut out = Array2::zeros(self.data.dim());
        out.slice_mut(s![.., ..len - self.ptr])
            .assign(&self.data.slice(s![.., self.ptr..]));
        out.slice_mut(s![.., len - self.ptr..])
            .assign(&self.data.slice(s![.., ..self.ptr]));
        out
    }
}

/// Display ring that keeps every `factor`-th sample
///
/// The decimation phase carries across chunks, so chunk boundaries do not
/// shift the kept sample grid.
#[derive(Debug, Clone)]
pub struct DisplayBuffer {
    ring: SampleRing,
    factor: usize,
    phase: usize,
}

impl DisplayBuffer {
    pub fn new(channels: usize, len: usize, factor: usize) -> Self {
        Self {
            ring: SampleRing::new(channels, len),
            factor: factor.max(1),
            phase: 0,
        }
    }

    pub fn factor(&self) -> usize {
        self.factor
    }

    pub fn clear(&mut self) {
        self.ring.clear();
        self.phase = 0;
    }

    pub fn push(&mut self, chunk: &SampleChunk) {
        let frames = chunk.frames();
        if frames == 0 {
            return;
        }
        let start = (self.factor - self.phase) % self.factor;
        if start < frames {
            let step = self.factor as isize;
            let kept = chunk.data().slice(s![.., start..;step]).to_owned();
            self.ring.push(&SampleChunk::new(kept));
        }
        self.phase = (self.phase + frames) % self.factor;
    }

    /// Snapshot oldest to newest, `[channels][len]`
    pub fn snapshot(&self) -> Array2<f32> {
        self.ring.linearized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_wraps_and_linearizes() {
        let mut ring = SampleRing::new(1, 4);
        ring.push(&SampleChunk::from_rows(vec![vec![1.0, 2.0, 3.0]]).unwrap());
        ring.push(&SampleChunk::from_rows(vec![vec![4.0, 5.0]]).unwrap());
        assert_eq!(ring.linearized().row(0).to_vec(), vec![2.0, 3.0, 4.0, 5.0]);

        ring.push(&SampleChunk::from_rows(vec![vec![6.0, 7.0, 8.0, 9.0, 10.0, 11.0]]).unwrap());
        assert_eq!(ring.linearized().row(0).to_vec(), vec![8.0, 9.0, 10.0, 11.0]);
    }

    #[test]
    fn test_display_decimation_keeps_phase() {
        let mut display = DisplayBuffer::new(1, 4, 3);
        display.push(&SampleChunk::from_rows(vec![vec![0.0, 1.0, 2.0, 3.0]]).unwrap());
        display.push(&SampleChunk::from_rows(vec![vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0]]).unwrap());
        // Samples 0, 3, 6, 9 are kept
        assert_eq!(display.snapshot().row(0).to_vec(), vec![0.0, 3.0, 6.0, 9.0]);
    }
}
