//! # Backend Playback
//!
//! Receives audio clips from the service, plays them one at a time in arrival
//! order and honours the flush control signal.
//!
//! ## Key Components:
//! - **clip**: payload plus arrival sequence and inferred media type
//! - **player**: the `ClipPlayer` seam and its rodio implementation
//! - **flush**: the cooldown window opened by a flush
//! - **coordinator**: queue and Idle/Playing state machine tying it together

pub mod clip;
pub mod coordinator;
pub mod flush;
pub mod player;
