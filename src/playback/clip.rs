//! Backend audio clips and their inferred media type.

use std::fmt;
use std::sync::Arc;

/// Media type inferred from a clip's file-extension-like suffix.
///
/// Only used for diagnostics: the decoder probes the payload itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Mpeg,
    Wav,
    Ogg,
    Aac,
    Unknown,
}

impl MediaType {
    /// Infer the type from whatever follows the last `.` of a source name.
    pub fn from_source(source: &str) -> Self {
        let extension = source.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match extension.as_str() {
            "mp3" => MediaType::Mpeg,
            "wav" => MediaType::Wav,
            "ogg" => MediaType::Ogg,
            "aac" => MediaType::Aac,
            _ => MediaType::Unknown,
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            MediaType::Mpeg => "audio/mpeg",
            MediaType::Wav => "audio/wav",
            MediaType::Ogg => "audio/ogg",
            MediaType::Aac => "audio/aac",
            MediaType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mime())
    }
}

/// Guess a file extension from the first bytes of a payload.
///
/// Binary frames arrive without a name, so this is what gives a clip its
/// extension-like suffix.
pub fn sniff_extension(payload: &[u8]) -> Option<&'static str> {
    match payload {
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'A', b'V', b'E', ..] => Some("wav"),
        [b'O', b'g', b'g', b'S', ..] => Some("ogg"),
        [b'I', b'D', b'3', ..] => Some("mp3"),
        // ADTS sync word, MPEG-4 and MPEG-2 without CRC
        [0xFF, 0xF1, ..] | [0xFF, 0xF9, ..] => Some("aac"),
        // MPEG-1 layer III frame sync
        [0xFF, 0xFB, ..] | [0xFF, 0xF3, ..] | [0xFF, 0xF2, ..] => Some("mp3"),
        _ => None,
    }
}

/// One opaque audio payload received from the backend.
///
/// The payload is reference counted so a clip can be handed to the player and
/// still be replayed later without copying the bytes.
#[derive(Debug, Clone)]
pub struct PlaybackClip {
    seq: u64,
    source: String,
    media_type: MediaType,
    payload: Arc<[u8]>,
}

impl PlaybackClip {
    /// Register a freshly received payload under arrival sequence `seq`.
    pub fn register(seq: u64, payload: Vec<u8>) -> Self {
        let source = match sniff_extension(&payload) {
            Some(ext) => format!("clip-{}.{}", seq, ext),
            None => format!("clip-{}", seq),
        };
        let media_type = MediaType::from_source(&source);

        Self {
            seq,
            source,
            media_type,
            payload: payload.into(),
        }
    }

    /// The same audio queued again under a new sequence number.
    pub fn replay(&self, seq: u64) -> Self {
        Self {
            seq,
            source: self.source.clone(),
            media_type: self.media_type,
            payload: Arc::clone(&self.payload),
        }
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn media_type(&self) -> MediaType {
        self.media_type
    }

    pub fn payload(&self) -> Arc<[u8]> {
        Arc::clone(&self.payload)
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
