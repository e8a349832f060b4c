//! WAV export for the local recording.
//!
//! Writes the canonical 44-byte header followed by 16-bit mono PCM. Every
//! multi-byte field is little-endian.

use crate::audio::pcm::sample_to_pcm16;
use crate::error::ClientResult;
use byteorder::{ByteOrder, LittleEndian};
use std::path::Path;

/// Size of the RIFF/WAVE header in bytes.
pub const WAV_HEADER_LEN: usize = 44;

const CHANNELS: u16 = 1;
const BITS_PER_SAMPLE: u16 = 16;
const BYTES_PER_SAMPLE: u32 = (BITS_PER_SAMPLE / 8) as u32;
const FORMAT_PCM: u16 = 1;

/// Encode float samples into a complete WAV file image.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * BYTES_PER_SAMPLE as usize;
    let mut out = vec![0u8; WAV_HEADER_LEN + data_len];

    out[0..4].copy_from_slice(b"RIFF");
    LittleEndian::write_u32(&mut out[4..8], (36 + data_len) as u32);
    out[8..12].copy_from_slice(b"WAVE");

    out[12..16].copy_from_slice(b"fmt ");
    LittleEndian::write_u32(&mut out[16..20], 16);
    LittleEndian::write_u16(&mut out[20..22], FORMAT_PCM);
    LittleEndian::write_u16(&mut out[22..24], CHANNELS);
    LittleEndian::write_u32(&mut out[24..28], sample_rate);
    LittleEndian::write_u32(
        &mut out[28..32],
        sample_rate * CHANNELS as u32 * BYTES_PER_SAMPLE,
    );
    LittleEndian::write_u16(&mut out[32..34], CHANNELS * BYTES_PER_SAMPLE as u16);
    LittleEndian::write_u16(&mut out[34..36], BITS_PER_SAMPLE);

    out[36..40].copy_from_slice(b"data");
    LittleEndian::write_u32(&mut out[40..44], data_len as u32);

    for (slot, &sample) in out[WAV_HEADER_LEN..].chunks_exact_mut(2).zip(samples) {
        LittleEndian::write_i16(slot, sample_to_pcm16(sample));
    }

    out
}

/// Encode and write a recording to disk.
pub fn write_wav_file(path: &Path, samples: &[f32], sample_rate: u32) -> ClientResult<usize> {
    let bytes = encode_wav(samples, sample_rate);
    std::fs::write(path, &bytes)?;
    Ok(bytes.len())
}
