//! # Audio Buffer Management
//!
//! Turns the arbitrarily-sized callbacks of an input device into the fixed-size
//! mono blocks the capture pipeline sends, and keeps the optional local recording.
//!
//! ## Key Features:
//! - **Fixed blocks**: Devices deliver whatever chunk size they like; the wire gets
//!   exactly `block_size` samples per frame, in time order
//! - **Channel extraction**: Only the first input channel is kept
//! - **Rate conversion**: Devices that cannot open at the target rate are linearly
//!   resampled, carrying state across callbacks so block boundaries stay seamless
//! - **Recording**: Raw float blocks can be accumulated for WAV export

use std::sync::{Arc, Mutex, PoisonError};

/// Accumulates device samples into fixed-size mono blocks.
pub struct BlockFramer {
    block_size: usize,
    pending: Vec<f32>,
    resampler: Option<LinearResampler>,
    scratch: Vec<f32>,
}

impl BlockFramer {
    /// Create a framer emitting `block_size`-sample blocks at `target_rate`
    /// from a device running at `source_rate`.
    pub fn new(block_size: usize, source_rate: u32, target_rate: u32) -> Self {
        let resampler = if source_rate == target_rate {
            None
        } else {
            Some(LinearResampler::new(source_rate, target_rate))
        };

        Self {
            block_size,
            pending: Vec::with_capacity(block_size * 2),
            resampler,
            scratch: Vec::new(),
        }
    }

    /// Push one device callback worth of interleaved samples.
    ///
    /// `emit` is called once per completed block, oldest first. Samples that do
    /// not fill a block yet are kept for the next callback.
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize, mut emit: impl FnMut(&[f32])) {
        let channels = channels.max(1);
        self.scratch.clear();
        self.scratch.extend(data.chunks(channels).map(|frame| frame[0]));

        match self.resampler.as_mut() {
            Some(resampler) => resampler.process(&self.scratch, &mut self.pending),
            None => self.pending.extend_from_slice(&self.scratch),
        }

        let mut consumed = 0;
        while self.pending.len() - consumed >= self.block_size {
            emit(&self.pending[consumed..consumed + self.block_size]);
            consumed += self.block_size;
        }
        self.pending.drain(..consumed);
    }

    /// Samples waiting for the next block.
    #[cfg(test)]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Streaming linear-interpolation resampler.
///
/// `position` is measured in input samples relative to the start of the current
/// chunk; index -1 refers to the last sample of the previous chunk.
struct LinearResampler {
    step: f64,
    position: f64,
    previous: f32,
}

impl LinearResampler {
    fn new(source_rate: u32, target_rate: u32) -> Self {
        Self {
            step: source_rate as f64 / target_rate as f64,
            position: 0.0,
            previous: 0.0,
        }
    }

    fn process(&mut self, input: &[f32], output: &mut Vec<f32>) {
        if input.is_empty() {
            return;
        }

        let last_index = (input.len() - 1) as f64;
        let sample_at = |index: isize| -> f32 {
            if index < 0 {
                self.previous
            } else {
                input[index as usize]
            }
        };

        while self.position < last_index {
            let base = self.position.floor();
            let frac = (self.position - base) as f32;
            let a = sample_at(base as isize);
            let b = sample_at(base as isize + 1);
            output.push(a + (b - a) * frac);
            self.position += self.step;
        }

        self.position -= input.len() as f64;
        self.previous = input[input.len() - 1];
    }
}

/// Raw float blocks kept for the optional local recording.
///
/// ## Thread Safety:
/// Written from the capture callback thread and read by the event loop at stop,
/// so the blocks sit behind `Arc<Mutex<...>>`.
#[derive(Debug, Clone, Default)]
pub struct RecordingBuffer {
    blocks: Arc<Mutex<Vec<Vec<f32>>>>,
}

impl RecordingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_block(&self, block: &[f32]) {
        self.lock().push(block.to_vec());
    }

    #[cfg(test)]
    pub fn block_count(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn total_samples(&self) -> usize {
        self.lock().iter().map(Vec::len).sum()
    }

    /// Take every recorded block, leaving the buffer empty.
    pub fn take_samples(&self) -> Vec<f32> {
        let blocks = std::mem::take(&mut *self.lock());
        blocks.into_iter().flatten().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Vec<f32>>> {
        self.blocks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocks_are_emitted_at_fixed_size() {
        let mut framer = BlockFramer::new(4, 16000, 16000);
        let mut blocks = Vec::new();

        framer.push_interleaved(&[0.1, 0.2, 0.3], 1, |b| blocks.push(b.to_vec()));
        assert!(blocks.is_empty());
        assert_eq!(framer.pending_len(), 3);

        framer.push_interleaved(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9], 1, |b| blocks.push(b.to_vec()));
        assert_eq!(blocks, vec![vec![0.1, 0.2, 0.3, 0.4], vec![0.5, 0.6, 0.7, 0.8]]);
        assert_eq!(framer.pending_len(), 1);
    }

    #[test]
    fn test_only_first_channel_is_kept() {
        let mut framer = BlockFramer::new(2, 16000, 16000);
        let mut blocks = Vec::new();

        // Interleaved stereo: left = 0.1/0.2, right = -0.9/-0.8
        framer.push_interleaved(&[0.1, -0.9, 0.2, -0.8], 2, |b| blocks.push(b.to_vec()));
        assert_eq!(blocks, vec![vec![0.1, 0.2]]);
    }

    #[test]
    fn test_downsampling_produces_target_rate() {
        let mut framer = BlockFramer::new(1600, 48000, 16000);
        let mut emitted = 0;

        // One second at 48kHz, delivered in uneven callbacks
        let second: Vec<f32> = (0..48000).map(|i| (i as f32 / 48000.0).sin()).collect();
        for chunk in second.chunks(1013) {
            framer.push_interleaved(chunk, 1, |b| {
                assert_eq!(b.len(), 1600);
                emitted += 1;
            });
        }

        let produced = emitted * 1600 + framer.pending_len();
        assert!((15990..=16010).contains(&produced), "produced {}", produced);
    }

    #[test]
    fn test_resampler_interpolates_across_chunks() {
        let mut resampler = LinearResampler::new(2, 1);
        let mut out = Vec::new();
        resampler.process(&[0.0, 1.0, 2.0], &mut out);
        resampler.process(&[3.0, 4.0, 5.0], &mut out);
        assert_eq!(out, vec![0.0, 2.0, 4.0]);
    }

    #[test]
    fn test_recording_buffer_concatenates_blocks() {
        let recording = RecordingBuffer::new();
        let capture_side = recording.clone();
        capture_side.push_block(&[0.1, 0.2]);
        capture_side.push_block(&[0.3]);

        assert_eq!(recording.block_count(), 2);
        assert_eq!(recording.total_samples(), 3);
        assert_eq!(recording.take_samples(), vec![0.1, 0.2, 0.3]);
        assert_eq!(recording.block_count(), 0);
    }
}
