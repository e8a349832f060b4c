//! # Error Handling
//!
//! Custom error types for the voice link client.
//!
//! ## Error Categories:
//! - **PermissionDenied**: Microphone access refused or no usable input device
//! - **ChannelUnavailable**: A capture block was offered while the socket was not open
//! - **PlaybackStartFailure / PlaybackRuntimeFailure**: A backend clip could not be played
//! - **DuplicateControlSignal**: A flush arrived while the cooldown was still running
//! - **Transport / Io**: Connection problems, playback thread and file export problems
//!
//! ## Propagation policy:
//! Every failure here is terminal only for the unit of work it describes (one capture
//! block, one clip, one command). None of them abort the session.

use crate::playback::clip::MediaType;
use crate::playback::player::MediaErrorCode;
use std::fmt;
use std::time::Duration;

/// Custom error types for the client.
///
/// ## Usage Example:
/// ```rust
/// return Err(ClientError::PermissionDenied("no input device available".to_string()));
/// ```
#[derive(Debug)]
pub enum ClientError {
    /// Microphone access was refused by the user, the OS or the audio backend
    PermissionDenied(String),

    /// Tried to send a frame while the transport channel was not open
    ChannelUnavailable,

    /// A clip could not begin playing (no device, undecodable payload, ...)
    PlaybackStartFailure {
        seq: u64,
        media_type: MediaType,
        code: MediaErrorCode,
        detail: String,
    },

    /// A clip started but failed before reaching its end
    PlaybackRuntimeFailure {
        seq: u64,
        media_type: MediaType,
        code: MediaErrorCode,
        detail: String,
    },

    /// Flush received while the cooldown window is still active
    DuplicateControlSignal {
        /// Time left before the block is lifted
        remaining: Duration,
    },

    /// WebSocket connection problems
    Transport(String),

    /// Local file export problems
    Io(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::PermissionDenied(msg) => write!(f, "Microphone access denied: {}", msg),
            ClientError::ChannelUnavailable => write!(f, "Transport channel is not open"),
            ClientError::PlaybackStartFailure { seq, media_type, code, detail } => write!(
                f,
                "Clip {} ({}) failed to start: {} [code {}] {}",
                seq,
                media_type.mime(),
                code.describe(),
                code.code(),
                detail
            ),
            ClientError::PlaybackRuntimeFailure { seq, media_type, code, detail } => write!(
                f,
                "Clip {} ({}) failed during playback: {} [code {}] {}",
                seq,
                media_type.mime(),
                code.describe(),
                code.code(),
                detail
            ),
            ClientError::DuplicateControlSignal { remaining } => write!(
                f,
                "Flush already in progress ({}ms of cooldown left)",
                remaining.as_millis()
            ),
            ClientError::Transport(msg) => write!(f, "Transport error: {}", msg),
            ClientError::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err.to_string())
    }
}

/// cpal reports a refused or missing microphone through several error types;
/// from the user's point of view they all mean "capture could not start".
impl From<cpal::BuildStreamError> for ClientError {
    fn from(err: cpal::BuildStreamError) -> Self {
        ClientError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for ClientError {
    fn from(err: cpal::PlayStreamError) -> Self {
        ClientError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for ClientError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        ClientError::PermissionDenied(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for ClientError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        ClientError::PermissionDenied(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type ClientResult<T> = Result<T, ClientError>;
