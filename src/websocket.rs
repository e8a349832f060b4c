//! # WebSocket Transport Channel
//!
//! The single duplex connection to the speech service.
//!
//! ## Protocol:
//! - **Client → Server**: Binary frames of raw 16-bit little-endian PCM, 16kHz mono,
//!   one capture block per frame, no header
//! - **Server → Client**: Text frames are either the flush control signal or a
//!   transcript line; binary frames are audio clips to play
//!
//! ## Structure:
//! `connect` splits the socket into a writer task and a reader task. Capture and
//! the session write through a cloneable `ChannelHandle`; the reader classifies
//! every inbound message and forwards it, in arrival order, to the session's
//! event loop. Every unit on either side is a complete message, so writers never
//! interleave partial frames.

use crate::audio::pcm::AudioFrame;
use crate::error::{ClientError, ClientResult};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Recognised control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    /// Stop and discard all backend playback, then block audio for a cooldown
    Flush,
}

/// Inbound traffic as the session sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Control(ControlSignal),
    Transcript(String),
    Audio(Vec<u8>),
    /// The connection failed; the reader stops after this
    Failed(String),
    /// The connection closed, with the peer's reason if it gave one
    Closed(Option<String>),
}

impl InboundMessage {
    /// Sort one WebSocket message. Returns `None` for frames the session does
    /// not care about (ping/pong, raw frames).
    pub fn classify(message: Message, clear_command: &str) -> Option<Self> {
        match message {
            Message::Text(text) if text == clear_command => Some(InboundMessage::Control(ControlSignal::Flush)),
            Message::Text(text) => Some(InboundMessage::Transcript(text)),
            Message::Binary(data) => Some(InboundMessage::Audio(data)),
            Message::Close(frame) => Some(InboundMessage::Closed(
                frame.map(|f| f.reason.into_owned()).filter(|reason| !reason.is_empty()),
            )),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => None,
        }
    }
}

/// Work for the writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Cloneable write side of the channel.
///
/// ## Thread Safety:
/// `send_frame` is called from the audio callback thread, so the handle only
/// holds an atomic flag and an unbounded sender, both usable without the
/// async runtime.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    open: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Outbound>,
}

impl ChannelHandle {
    /// An open handle and the queue its writes land in.
    pub fn pair() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = Self {
            open: Arc::new(AtomicBool::new(true)),
            tx,
        };
        (handle, rx)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Queue one PCM frame. Fails with `ChannelUnavailable` if the channel is
    /// not open; the frame is then gone.
    pub fn send_frame(&self, frame: AudioFrame) -> ClientResult<()> {
        if !self.is_open() {
            return Err(ClientError::ChannelUnavailable);
        }

        self.tx
            .send(Outbound::Frame(frame.into_le_bytes()))
            .map_err(|_| {
                self.mark_closed();
                ClientError::ChannelUnavailable
            })
    }

    /// Close the channel. Returns true only for the call that actually closed it.
    pub fn close(&self) -> bool {
        if !self.open.swap(false, Ordering::SeqCst) {
            return false;
        }
        let _ = self.tx.send(Outbound::Close);
        true
    }

    fn mark_closed(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// Connect to `url` and start the reader and writer tasks.
///
/// Returns the write handle and the ordered stream of inbound messages. The
/// inbound stream always ends with `Failed` or `Closed`.
pub async fn connect(
    url: &str,
    timeout: Duration,
    clear_command: &str,
) -> ClientResult<(ChannelHandle, mpsc::UnboundedReceiver<InboundMessage>)> {
    info!(%url, "Connecting to speech service");

    let (stream, _response) = tokio::time::timeout(timeout, connect_async(url))
        .await
        .map_err(|_| ClientError::Transport(format!("connection timed out after {}ms", timeout.as_millis())))??;

    let (mut write, mut read) = stream.split();
    let (handle, mut outbound) = ChannelHandle::pair();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let writer_handle = handle.clone();
    tokio::spawn(async move {
        while let Some(item) = outbound.recv().await {
            match item {
                Outbound::Frame(bytes) => {
                    if let Err(e) = write.send(Message::Binary(bytes)).await {
                        error!(error = %e, "Failed to send audio frame");
                        writer_handle.mark_closed();
                        break;
                    }
                }
                Outbound::Close => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(error = %e, "Close frame not delivered");
                    }
                    break;
                }
            }
        }
        writer_handle.mark_closed();
        debug!("Writer task finished");
    });

    let reader_handle = handle.clone();
    let clear_command = clear_command.to_string();
    tokio::spawn(async move {
        let mut ended = false;
        while let Some(result) = read.next().await {
            let inbound = match result {
                Ok(message) => match InboundMessage::classify(message, &clear_command) {
                    Some(inbound) => inbound,
                    None => continue,
                },
                Err(e) => {
                    warn!(error = %e, "WebSocket read failed");
                    InboundMessage::Failed(e.to_string())
                }
            };

            ended = matches!(inbound, InboundMessage::Failed(_) | InboundMessage::Closed(_));
            if inbound_tx.send(inbound).is_err() || ended {
                break;
            }
        }

        reader_handle.mark_closed();
        if !ended {
            let _ = inbound_tx.send(InboundMessage::Closed(None));
        }
        debug!("Reader task finished");
    });

    info!("WebSocket connection opened");
    Ok((handle, inbound_rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    #[test]
    fn test_clear_command_is_a_control_signal() {
        let msg = InboundMessage::classify(Message::Text("$clear$".to_string()), "$clear$");
        assert_eq!(msg, Some(InboundMessage::Control(ControlSignal::Flush)));
    }

    #[test]
    fn test_other_text_is_a_transcript_line() {
        // Near misses are transcript text, not control
        for text in ["$clear", " $clear$", "hello"] {
            let msg = InboundMessage::classify(Message::Text(text.to_string()), "$clear$");
            assert_eq!(msg, Some(InboundMessage::Transcript(text.to_string())));
        }
    }

    #[test]
    fn test_binary_is_audio_and_pings_are_skipped() {
        let msg = InboundMessage::classify(Message::Binary(vec![1, 2, 3]), "$clear$");
        assert_eq!(msg, Some(InboundMessage::Audio(vec![1, 2, 3])));
        assert_eq!(InboundMessage::classify(Message::Ping(vec![]), "$clear$"), None);
    }

    #[test]
    fn test_close_carries_reason() {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        let msg = InboundMessage::classify(Message::Close(Some(frame)), "$clear$");
        assert_eq!(msg, Some(InboundMessage::Closed(Some("bye".to_string()))));
        assert_eq!(
            InboundMessage::classify(Message::Close(None), "$clear$"),
            Some(InboundMessage::Closed(None))
        );
    }

    #[test]
    fn test_handle_refuses_frames_after_close() {
        let (handle, mut rx) = ChannelHandle::pair();
        let other = handle.clone();

        assert!(handle.send_frame(AudioFrame::encode(&[0.0])).is_ok());
        assert!(other.close());
        assert!(!handle.close());
        assert!(matches!(
            handle.send_frame(AudioFrame::encode(&[0.0])),
            Err(ClientError::ChannelUnavailable)
        ));

        assert_eq!(rx.try_recv().unwrap(), Outbound::Frame(vec![0, 0]));
        assert_eq!(rx.try_recv().unwrap(), Outbound::Close);
        assert!(rx.try_recv().is_err());
    }
}
