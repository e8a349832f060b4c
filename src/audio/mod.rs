//! # Audio Module
//!
//! Everything that touches raw audio on the capture side of the client.
//!
//! ## Key Components:
//! - **PCM Encoder** (`pcm`): float samples to 16-bit little-endian integers
//! - **Block framing** (`buffer`): fixed-size mono blocks out of device callbacks
//! - **Capture Pipeline** (`capture`): microphone to transport channel
//! - **WAV export** (`wav`): byte-exact header for the local recording
//!
//! ## Wire Format Requirements:
//! - **Sample Rate**: 16kHz (16,000 Hz)
//! - **Bit Depth**: 16-bit PCM
//! - **Channels**: Mono (1 channel)
//! - **Encoding**: Little-endian signed integers, no header

pub mod buffer;
pub mod capture;
pub mod pcm;
pub mod wav;
