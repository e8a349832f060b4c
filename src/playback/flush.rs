//! # Flush Controller
//!
//! Owns the block window that follows a flush.
//!
//! ## Rules:
//! - A flush opens the window and fixes its deadline once
//! - A flush that arrives while the window is open is refused and the deadline
//!   stays where it was
//! - Only the cooldown timer closes the window (`release`), never inbound data
//!
//! The deadline is a `tokio::time::Instant`, so the event loop can sleep until it
//! and tests can drive it with a paused clock.

use crate::error::{ClientError, ClientResult};
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct FlushController {
    cooldown: Duration,
    blocked_until: Option<Instant>,
}

impl FlushController {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            blocked_until: None,
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.blocked_until.is_some()
    }

    /// When the current block ends, if one is active.
    pub fn block_expires_at(&self) -> Option<Instant> {
        self.blocked_until
    }

    /// Open the block window at `now`.
    ///
    /// Returns the deadline of the new window, or `DuplicateControlSignal` with
    /// the time left if a window is already open.
    pub fn try_begin(&mut self, now: Instant) -> ClientResult<Instant> {
        if let Some(deadline) = self.blocked_until {
            return Err(ClientError::DuplicateControlSignal {
                remaining: deadline.saturating_duration_since(now),
            });
        }

        let deadline = now + self.cooldown;
        self.blocked_until = Some(deadline);
        Ok(deadline)
    }

    /// Close the window. Returns false if nothing was blocking.
    pub fn release(&mut self) -> bool {
        self.blocked_until.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_flush_keeps_original_deadline() {
        let mut flush = FlushController::new(Duration::from_millis(500));
        let t0 = Instant::now();

        let deadline = flush.try_begin(t0).unwrap();
        assert_eq!(deadline, t0 + Duration::from_millis(500));

        match flush.try_begin(t0 + Duration::from_millis(200)) {
            Err(ClientError::DuplicateControlSignal { remaining }) => {
                assert_eq!(remaining, Duration::from_millis(300));
            }
            other => panic!("expected duplicate signal, got {:?}", other),
        }
        assert_eq!(flush.block_expires_at(), Some(deadline));
    }

    #[test]
    fn test_release_reopens_for_next_flush() {
        let mut flush = FlushController::new(Duration::from_millis(500));
        let t0 = Instant::now();

        assert!(!flush.release());
        flush.try_begin(t0).unwrap();
        assert!(flush.is_blocking());

        assert!(flush.release());
        assert!(!flush.is_blocking());
        assert!(flush.try_begin(t0 + Duration::from_secs(1)).is_ok());
    }
}
