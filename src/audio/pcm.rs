//! # PCM Encoding
//!
//! Converts normalized floating-point samples into the 16-bit signed PCM the
//! speech service expects on the wire.
//!
//! ## Scaling:
//! Samples are clamped to [-1.0, 1.0] first. Negative values scale by 32768 and
//! non-negative values by 32767, so both ends of the float range map onto the
//! ends of the i16 range without overflow. The scaled value is truncated toward
//! zero.

use byteorder::{ByteOrder, LittleEndian};

/// Scale applied to negative samples (`0x8000`).
pub const NEGATIVE_SCALE: f32 = 32768.0;

/// Scale applied to zero and positive samples (`0x7FFF`).
pub const POSITIVE_SCALE: f32 = 32767.0;

/// Convert one normalized sample to 16-bit PCM.
///
/// NaN has no meaningful amplitude and encodes as silence.
pub fn sample_to_pcm16(sample: f32) -> i16 {
    let clamped = sample.clamp(-1.0, 1.0);
    if clamped < 0.0 {
        (clamped * NEGATIVE_SCALE) as i16
    } else {
        (clamped * POSITIVE_SCALE) as i16
    }
}

/// Convert a block of normalized samples to 16-bit PCM.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| sample_to_pcm16(s)).collect()
}

/// One capture block, encoded and ready for transmission.
///
/// Frames are immutable once built; ownership moves to the transport channel
/// when sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Encode a block of float samples.
    pub fn encode(block: &[f32]) -> Self {
        Self {
            samples: float_to_pcm16(block),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Raw little-endian bytes, no header. The channel's message boundary
    /// delimits the frame.
    pub fn into_le_bytes(self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.samples.len() * 2];
        LittleEndian::write_i16_into(&self.samples, &mut bytes);
        bytes
    }
}
