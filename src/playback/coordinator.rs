//! # Playback Coordinator
//!
//! Single owner of the backend playback queue, the Idle/Playing state and the
//! flush block window. It is only ever touched from the session event loop, so
//! none of it needs a lock.
//!
//! ## State machine:
//! ```text
//!            arrival (queue was idle)            finished, queue empty
//!   Idle ─────────────────────────────▶ Playing ─────────────────────────▶ Idle
//!                                         │  ▲
//!                                         └──┘ finished, next clip dequeued
//! ```
//! - Arrivals while Playing only enqueue, so a burst never starts two clips
//! - A clip that fails to start or fails mid-stream is logged and treated as
//!   finished, so the queue always moves on
//! - A finish event for anything but the current clip is stale and ignored
//!
//! ## Flush:
//! Stops every clip received this session, empties the queue, returns to Idle and
//! opens the cooldown window. Inbound clips are dropped until the session calls
//! `on_cooldown_elapsed`.

use crate::error::ClientError;
use crate::playback::clip::{MediaType, PlaybackClip};
use crate::playback::flush::FlushController;
use crate::playback::player::{supported_formats_summary, ClipFinished, ClipPlayer, PlaybackOutcome};
use crate::state::ClientState;
use crate::surface::{Control, ControlSurface};
use std::collections::VecDeque;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const STATUS_PLAYBACK_CLEARED: &str = "Playback cleared.";
pub const STATUS_READY_AGAIN: &str = "Ready to receive audio again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Idle,
    Playing { seq: u64 },
}

/// What happened to an inbound clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrivalOutcome {
    /// Discarded because a flush cooldown was running
    Dropped,
    Queued { seq: u64 },
}

/// Enough about the playing clip to log its failure after the player took it.
#[derive(Debug, Clone)]
struct ClipTag {
    seq: u64,
    source: String,
    media_type: MediaType,
}

impl ClipTag {
    fn of(clip: &PlaybackClip) -> Self {
        Self {
            seq: clip.seq(),
            source: clip.source().to_string(),
            media_type: clip.media_type(),
        }
    }
}

pub struct PlaybackCoordinator<P: ClipPlayer> {
    player: P,
    queue: VecDeque<PlaybackClip>,
    playing: Option<ClipTag>,
    /// Every clip received since the last flush, in arrival order
    received: Vec<PlaybackClip>,
    flush: FlushController,
    next_seq: u64,
    state: ClientState,
}

impl<P: ClipPlayer> PlaybackCoordinator<P> {
    pub fn new(player: P, state: ClientState) -> Self {
        let cooldown = state.config().playback.cooldown();
        Self {
            player,
            queue: VecDeque::new(),
            playing: None,
            received: Vec::new(),
            flush: FlushController::new(cooldown),
            next_seq: 0,
            state,
        }
    }

    pub fn state(&self) -> PlaybackState {
        match &self.playing {
            Some(tag) => PlaybackState::Playing { seq: tag.seq },
            None => PlaybackState::Idle,
        }
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub fn received_len(&self) -> usize {
        self.received.len()
    }

    pub fn is_blocking(&self) -> bool {
        self.flush.is_blocking()
    }

    pub fn block_expires_at(&self) -> Option<Instant> {
        self.flush.block_expires_at()
    }

    #[cfg(test)]
    pub fn player(&self) -> &P {
        &self.player
    }

    /// Register an inbound binary payload and queue it for playback.
    pub fn on_clip_arrival(&mut self, payload: Vec<u8>, surface: &mut dyn ControlSurface) -> ArrivalOutcome {
        if self.flush.is_blocking() {
            self.state.record_clip_dropped();
            debug!(bytes = payload.len(), "Flush cooldown active, dropping inbound clip");
            return ArrivalOutcome::Dropped;
        }

        let clip = PlaybackClip::register(self.allocate_seq(), payload);
        let seq = clip.seq();
        debug!(seq, source = clip.source(), bytes = clip.len(), "Clip received");

        self.state.record_clip_received();
        self.received.push(clip.clone());
        surface.set_enabled(Control::PlayBackendClips, true);

        self.enqueue(clip);
        ArrivalOutcome::Queued { seq }
    }

    /// Queue every clip received so far once more, in arrival order.
    ///
    /// Returns how many clips were queued; nothing is queued during a cooldown.
    pub fn replay_received(&mut self) -> usize {
        if self.flush.is_blocking() {
            debug!("Flush cooldown active, not replaying");
            return 0;
        }

        let originals = self.received.clone();
        let count = originals.len();

        for clip in &originals {
            let replay = clip.replay(self.allocate_seq());
            self.enqueue(replay);
        }

        info!(count, "Replaying backend clips");
        count
    }

    /// Handle the player's report for a clip.
    pub fn on_clip_finished(&mut self, event: ClipFinished) {
        let tag = match self.playing.take() {
            Some(tag) if tag.seq == event.seq => tag,
            other => {
                self.playing = other;
                debug!(seq = event.seq, "Ignoring stale clip completion");
                return;
            }
        };

        match event.outcome {
            PlaybackOutcome::Completed => {
                self.state.record_clip_played();
                debug!(seq = tag.seq, "Clip finished");
            }
            PlaybackOutcome::StartFailed(failure) => {
                self.report_failure(
                    &tag,
                    ClientError::PlaybackStartFailure {
                        seq: tag.seq,
                        media_type: tag.media_type,
                        code: failure.code,
                        detail: failure.detail,
                    },
                );
            }
            PlaybackOutcome::RuntimeFailed(failure) => {
                self.report_failure(
                    &tag,
                    ClientError::PlaybackRuntimeFailure {
                        seq: tag.seq,
                        media_type: tag.media_type,
                        code: failure.code,
                        detail: failure.detail,
                    },
                );
            }
        }

        self.advance();
    }

    /// Apply the flush control signal received at `now`.
    ///
    /// Returns the cooldown deadline, or `None` when a cooldown was already
    /// running and the signal was ignored.
    pub fn on_flush(&mut self, now: Instant, surface: &mut dyn ControlSurface) -> Option<Instant> {
        let deadline = match self.flush.try_begin(now) {
            Ok(deadline) => deadline,
            Err(e) => {
                self.state.record_flush(false);
                debug!(reason = %e, "Flush ignored");
                return None;
            }
        };

        for clip in &self.received {
            self.player.stop(clip.seq());
        }
        if let Some(tag) = self.playing.take() {
            if !self.received.iter().any(|clip| clip.seq() == tag.seq) {
                self.player.stop(tag.seq);
            }
        }

        let stopped = self.received.len();
        let discarded = self.queue.len();
        self.received.clear();
        self.queue.clear();

        surface.set_enabled(Control::PlayBackendClips, false);
        surface.status(STATUS_PLAYBACK_CLEARED);
        self.state.record_flush(true);
        info!(stopped, discarded, "Playback flushed");

        Some(deadline)
    }

    /// The cooldown timer fired: accept inbound clips again.
    pub fn on_cooldown_elapsed(&mut self, surface: &mut dyn ControlSurface) {
        if self.flush.release() {
            surface.status(STATUS_READY_AGAIN);
            info!("Flush cooldown over");
        }
    }

    /// Stop whatever is playing and drop the queue, at session end.
    pub fn shutdown(&mut self) {
        if let Some(tag) = self.playing.take() {
            self.player.stop(tag.seq);
        }
        self.queue.clear();
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn enqueue(&mut self, clip: PlaybackClip) {
        self.queue.push_back(clip);
        if self.playing.is_none() {
            self.advance();
        }
    }

    /// Start queued clips until one is accepted by the player or the queue is empty.
    fn advance(&mut self) {
        while self.playing.is_none() {
            let Some(clip) = self.queue.pop_front() else {
                debug!("Playback queue drained");
                return;
            };

            let tag = ClipTag::of(&clip);
            match self.player.start(clip) {
                Ok(()) => {
                    debug!(seq = tag.seq, source = %tag.source, "Clip handed to player");
                    self.playing = Some(tag);
                }
                Err(failure) => {
                    self.report_failure(
                        &tag,
                        ClientError::PlaybackStartFailure {
                            seq: tag.seq,
                            media_type: tag.media_type,
                            code: failure.code,
                            detail: failure.detail,
                        },
                    );
                }
            }
        }
    }

    fn report_failure(&self, tag: &ClipTag, error: ClientError) {
        self.state.record_clip_failed();
        warn!(
            seq = tag.seq,
            source = %tag.source,
            media_type = %tag.media_type,
            error = %error,
            "Clip playback failed, moving on"
        );
        info!(formats = %supported_formats_summary(), "Locally supported audio formats");
    }
}
