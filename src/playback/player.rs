//! # Clip Player
//!
//! Plays one backend clip at a time and reports how it ended.
//!
//! ## Design:
//! The coordinator talks to a `ClipPlayer`. Starting a clip only hands it over;
//! whether it played, failed to start or broke mid-stream comes back later as a
//! `ClipFinished` event on the session's event loop. This keeps the queue logic
//! free of callbacks and lets tests swap in a recording fake.
//!
//! ## RodioPlayer:
//! rodio's `OutputStream` is not `Send`, so the real player owns a dedicated
//! thread that keeps the output device open, decodes clips and watches the sink
//! for completion. The event loop talks to it through a command channel.

use crate::error::ClientResult;
use crate::playback::clip::PlaybackClip;
use rodio::decoder::DecoderError;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source};
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc as std_mpsc, Arc};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// How often the playback thread checks the sink when no command arrives.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A clip that stops before this share of its declared length is reported
/// as a mid-stream failure.
const MIN_PLAYED_RATIO: f64 = 0.9;

/// Failure categories reported for a clip, numbered like media element errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaErrorCode {
    Aborted,
    Network,
    Decode,
    SrcNotSupported,
}

impl MediaErrorCode {
    pub fn code(&self) -> u8 {
        match self {
            MediaErrorCode::Aborted => 1,
            MediaErrorCode::Network => 2,
            MediaErrorCode::Decode => 3,
            MediaErrorCode::SrcNotSupported => 4,
        }
    }

    /// Human-readable description of the failure category.
    pub fn describe(&self) -> &'static str {
        match self {
            MediaErrorCode::Aborted => "Playback was aborted.",
            MediaErrorCode::Network => "The audio data could not be retrieved.",
            MediaErrorCode::Decode => "The audio could not be decoded or the file is corrupt.",
            MediaErrorCode::SrcNotSupported => "The audio format is not supported.",
        }
    }
}

/// Why a clip did not play through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackFailure {
    pub code: MediaErrorCode,
    pub detail: String,
}

impl PlaybackFailure {
    pub fn new(code: MediaErrorCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackOutcome {
    Completed,
    StartFailed(PlaybackFailure),
    RuntimeFailed(PlaybackFailure),
}

/// Reported once per started clip, unless the clip was stopped first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipFinished {
    pub seq: u64,
    pub outcome: PlaybackOutcome,
}

/// Something that can play a single clip at a time.
pub trait ClipPlayer {
    /// Begin playing `clip`. An `Err` means the clip never started and no
    /// `ClipFinished` will follow for it.
    fn start(&mut self, clip: PlaybackClip) -> Result<(), PlaybackFailure>;

    /// Stop `seq` if it is playing and forget it. No event is reported for a
    /// stopped clip.
    fn stop(&mut self, seq: u64);
}

/// Formats the local decoder can play, as (extension, supported).
pub const SUPPORTED_FORMATS: [(&str, bool); 5] = [
    ("mp3", true),
    ("wav", true),
    ("ogg", true),
    ("aac", false),
    ("flac", true),
];

/// One-line summary of `SUPPORTED_FORMATS` for diagnostics.
pub fn supported_formats_summary() -> String {
    SUPPORTED_FORMATS
        .iter()
        .map(|(ext, ok)| format!("{}={}", ext, if *ok { "yes" } else { "no" }))
        .collect::<Vec<_>>()
        .join(" ")
}

enum PlayerCommand {
    Play(PlaybackClip),
    Stop(u64),
    Shutdown,
}

/// `ClipPlayer` backed by rodio on a dedicated thread.
pub struct RodioPlayer {
    commands: std_mpsc::Sender<PlayerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl RodioPlayer {
    /// Spawn the playback thread. Outcomes are delivered on `events`.
    pub fn spawn(events: mpsc::UnboundedSender<ClipFinished>) -> ClientResult<Self> {
        let (commands, rx) = std_mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("clip-player".to_string())
            .spawn(move || run_player(rx, events))?;

        Ok(Self {
            commands,
            thread: Some(thread),
        })
    }
}

impl ClipPlayer for RodioPlayer {
    fn start(&mut self, clip: PlaybackClip) -> Result<(), PlaybackFailure> {
        self.commands
            .send(PlayerCommand::Play(clip))
            .map_err(|_| PlaybackFailure::new(MediaErrorCode::Aborted, "playback thread is not running"))
    }

    fn stop(&mut self, seq: u64) {
        let _ = self.commands.send(PlayerCommand::Stop(seq));
    }
}

impl Drop for RodioPlayer {
    fn drop(&mut self) {
        let _ = self.commands.send(PlayerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Playback thread panicked");
            }
        }
    }
}

/// Clip currently owned by the sink.
struct ActiveClip {
    seq: u64,
    sink: Sink,
    played: Arc<AtomicU64>,
    expected: Option<u64>,
}

impl ActiveClip {
    fn outcome(&self) -> PlaybackOutcome {
        judge_outcome(self.played.load(Ordering::Relaxed), self.expected)
    }
}

/// A drained sink means the clip ended; whether it ended well depends on how
/// much of the declared length was actually decoded.
fn judge_outcome(played: u64, expected: Option<u64>) -> PlaybackOutcome {
    match expected {
        Some(expected) if (played as f64) < expected as f64 * MIN_PLAYED_RATIO => {
            PlaybackOutcome::RuntimeFailed(PlaybackFailure::new(
                MediaErrorCode::Decode,
                format!("stream ended after {} of {} samples", played, expected),
            ))
        }
        _ => PlaybackOutcome::Completed,
    }
}

fn run_player(commands: std_mpsc::Receiver<PlayerCommand>, events: mpsc::UnboundedSender<ClipFinished>) {
    // The stream must stay alive for as long as anything plays through its handle
    let output = match OutputStream::try_default() {
        Ok(output) => Some(output),
        Err(e) => {
            warn!(error = %e, "No audio output device, backend clips will fail to start");
            None
        }
    };
    let handle = output.as_ref().map(|(_, handle)| handle);
    let mut current: Option<ActiveClip> = None;

    loop {
        match commands.recv_timeout(POLL_INTERVAL) {
            Ok(PlayerCommand::Play(clip)) => {
                if let Some(previous) = current.take() {
                    previous.sink.stop();
                }
                let seq = clip.seq();
                match open_clip(handle, clip) {
                    Ok(active) => current = Some(active),
                    Err(failure) => {
                        let _ = events.send(ClipFinished {
                            seq,
                            outcome: PlaybackOutcome::StartFailed(failure),
                        });
                    }
                }
            }
            Ok(PlayerCommand::Stop(seq)) => {
                if current.as_ref().is_some_and(|active| active.seq == seq) {
                    if let Some(active) = current.take() {
                        active.sink.stop();
                        debug!(seq, "Clip stopped");
                    }
                }
            }
            Ok(PlayerCommand::Shutdown) | Err(std_mpsc::RecvTimeoutError::Disconnected) => break,
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
        }

        if current.as_ref().is_some_and(|active| active.sink.empty()) {
            if let Some(active) = current.take() {
                let _ = events.send(ClipFinished {
                    seq: active.seq,
                    outcome: active.outcome(),
                });
            }
        }
    }

    if let Some(active) = current.take() {
        active.sink.stop();
    }
    info!("Playback thread stopped");
}

fn open_clip(handle: Option<&OutputStreamHandle>, clip: PlaybackClip) -> Result<ActiveClip, PlaybackFailure> {
    let handle = handle.ok_or_else(|| PlaybackFailure::new(MediaErrorCode::Aborted, "no audio output device"))?;

    if clip.is_empty() {
        return Err(PlaybackFailure::new(MediaErrorCode::Network, "empty payload"));
    }

    let decoder = Decoder::new(Cursor::new(clip.payload())).map_err(|e| match e {
        DecoderError::UnrecognizedFormat => PlaybackFailure::new(MediaErrorCode::SrcNotSupported, e.to_string()),
        other => PlaybackFailure::new(MediaErrorCode::Decode, other.to_string()),
    })?;

    let expected = decoder.total_duration().map(|duration| {
        (duration.as_secs_f64() * decoder.sample_rate() as f64 * decoder.channels() as f64) as u64
    });

    let sink = Sink::try_new(handle).map_err(|e| PlaybackFailure::new(MediaErrorCode::Aborted, e.to_string()))?;
    let played = Arc::new(AtomicU64::new(0));
    sink.append(MonitoredSource {
        inner: decoder,
        played: Arc::clone(&played),
    });

    debug!(seq = clip.seq(), source = clip.source(), bytes = clip.len(), "Clip started");
    Ok(ActiveClip {
        seq: clip.seq(),
        sink,
        played,
        expected,
    })
}

/// Counts the samples the sink actually pulls from the decoder.
struct MonitoredSource<S> {
    inner: S,
    played: Arc<AtomicU64>,
}

impl<S> Iterator for MonitoredSource<S>
where
    S: Source,
    S::Item: rodio::Sample,
{
    type Item = S::Item;

    fn next(&mut self) -> Option<Self::Item> {
        let sample = self.inner.next();
        if sample.is_some() {
            self.played.fetch_add(1, Ordering::Relaxed);
        }
        sample
    }
}

impl<S> Source for MonitoredSource<S>
where
    S: Source,
    S::Item: rodio::Sample,
{
    fn current_frame_len(&self) -> Option<usize> {
        self.inner.current_frame_len()
    }

    fn channels(&self) -> u16 {
        self.inner.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        self.inner.total_duration()
    }
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashSet;

    /// Records every call; fails to start the seqs listed in `fail_start`.
    #[derive(Debug, Default)]
    pub struct FakePlayer {
        pub started: Vec<u64>,
        pub stopped: Vec<u64>,
        pub fail_start: HashSet<u64>,
    }

    impl FakePlayer {
        pub fn failing(seqs: &[u64]) -> Self {
            Self {
                fail_start: seqs.iter().copied().collect(),
                ..Self::default()
            }
        }
    }

    impl ClipPlayer for FakePlayer {
        fn start(&mut self, clip: PlaybackClip) -> Result<(), PlaybackFailure> {
            if self.fail_start.contains(&clip.seq()) {
                return Err(PlaybackFailure::new(MediaErrorCode::SrcNotSupported, "fake refusal"));
            }
            self.started.push(clip.seq());
            Ok(())
        }

        fn stop(&mut self, seq: u64) {
            self.stopped.push(seq);
        }
    }
}
