//! # Client State Management
//!
//! Shared state that both the event loop and the audio capture thread touch.
//!
//! ## Who writes what:
//! - The **capture callback** (a cpal-owned thread) counts frames sent and dropped
//! - The **event loop** counts clips, flushes and transcript lines
//!
//! Because the capture callback runs outside the async runtime, the counters live
//! behind `Arc<RwLock<...>>` the same way request metrics are shared between
//! handlers in a web server.

use crate::config::AppConfig;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

/// State shared by every part of a running client.
///
/// ## Rust Concepts:
/// - **Arc<AppConfig>**: Configuration never changes after startup, so sharing is enough
/// - **Arc<RwLock<ClientMetrics>>**: Counters are updated from two threads
/// - **Clone**: Cloning copies the `Arc` pointers, not the data
#[derive(Debug, Clone)]
pub struct ClientState {
    pub config: Arc<AppConfig>,
    pub metrics: Arc<RwLock<ClientMetrics>>,
    pub start_time: Instant,
}

/// Counters collected over the lifetime of the client.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ClientMetrics {
    /// PCM frames handed to the transport channel
    pub frames_sent: u64,

    /// Capture blocks dropped because the channel was not open
    pub frames_dropped: u64,

    /// Backend clips accepted into the playback queue
    pub clips_received: u64,

    /// Backend clips discarded during a flush cooldown
    pub clips_dropped: u64,

    /// Clips that played to completion
    pub clips_played: u64,

    /// Clips that failed to start or failed mid-stream
    pub clips_failed: u64,

    /// Flush signals that cleared playback
    pub flushes_applied: u64,

    /// Flush signals ignored because a cooldown was running
    pub flushes_ignored: u64,

    /// Transcript lines rendered
    pub transcript_lines: u64,
}

impl ClientState {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(ClientMetrics::default())),
            start_time: Instant::now(),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Apply an update to the counters.
    ///
    /// A poisoned lock only means another thread panicked mid-increment;
    /// the counters are still usable, so we keep going with them.
    fn update(&self, apply: impl FnOnce(&mut ClientMetrics)) {
        let mut metrics = self.metrics.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut metrics);
    }

    pub fn record_frame_sent(&self) {
        self.update(|m| m.frames_sent += 1);
    }

    pub fn record_frame_dropped(&self) {
        self.update(|m| m.frames_dropped += 1);
    }

    pub fn record_clip_received(&self) {
        self.update(|m| m.clips_received += 1);
    }

    pub fn record_clip_dropped(&self) {
        self.update(|m| m.clips_dropped += 1);
    }

    pub fn record_clip_played(&self) {
        self.update(|m| m.clips_played += 1);
    }

    pub fn record_clip_failed(&self) {
        self.update(|m| m.clips_failed += 1);
    }

    pub fn record_flush(&self, applied: bool) {
        self.update(|m| {
            if applied {
                m.flushes_applied += 1;
            } else {
                m.flushes_ignored += 1;
            }
        });
    }

    pub fn record_transcript_line(&self) {
        self.update(|m| m.transcript_lines += 1);
    }

    /// Get a snapshot of current metrics.
    ///
    /// Clones under a read lock so callers never hold the lock while logging.
    pub fn metrics_snapshot(&self) -> ClientMetrics {
        self.metrics
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_shared_between_clones() {
        let state = ClientState::new(AppConfig::default());
        let capture_side = state.clone();

        capture_side.record_frame_sent();
        capture_side.record_frame_dropped();
        state.record_flush(true);
        state.record_flush(false);

        let snapshot = state.metrics_snapshot();
        assert_eq!(snapshot.frames_sent, 1);
        assert_eq!(snapshot.frames_dropped, 1);
        assert_eq!(snapshot.flushes_applied, 1);
        assert_eq!(snapshot.flushes_ignored, 1);
    }

    #[test]
    fn test_snapshot_serializes_to_json() {
        let state = ClientState::new(AppConfig::default());
        state.record_clip_received();

        let json = serde_json::to_value(state.metrics_snapshot()).unwrap();
        assert_eq!(json["clips_received"], 1);
        assert_eq!(json["clips_played"], 0);
    }
}
