//! # Voice Link Client - Main Application Entry Point
//!
//! Console client that streams the microphone to a speech service over a
//! WebSocket and plays back the audio the service answers with.
//!
//! ## Key Rust Concepts Used:
//! - **async/await**: One event loop task drives the whole session
//! - **modules**: Code is organized into separate modules (mod statements)
//! - **Result<T, E>**: Error handling using Rust's Result type
//! - **static**: A global shutdown flag shared with the signal handler task
//!
//! ## Application Architecture:
//! - **config**: Client configuration (TOML file + environment variables)
//! - **state**: Shared metrics, touched by the capture thread and the event loop
//! - **audio**: PCM encoding, block framing, microphone capture, WAV export
//! - **websocket**: The duplex channel to the speech service
//! - **playback**: Backend clip queue, player and flush handling
//! - **surface**: Console controls, status lines and transcript
//! - **session**: The event loop wiring all of the above together
//! - **error**: Custom error types

mod audio;
mod config;
mod error;
mod playback;
mod session;
mod state;
mod surface;
mod websocket;

use crate::config::AppConfig;
use crate::playback::player::RodioPlayer;
use crate::session::{ClientSession, ConsoleCommand};
use crate::state::ClientState;
use crate::surface::ConsoleSurface;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{info, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal, set by the signal handler task.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

/// The main application entry point.
///
/// ## What this function does:
/// 1. **Loads configuration** from files and environment variables
/// 2. **Sets up logging**
/// 3. **Starts the playback thread** and the console surface
/// 4. **Runs the session** until `quit`, end of a signal, or Ctrl+C
/// 5. **Logs the final metrics** as JSON
#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting voice-link-client v{}", env!("CARGO_PKG_VERSION"));
    info!(
        url = %config.server.url,
        sample_rate = config.audio.sample_rate,
        block_size = config.audio.block_size,
        cooldown_ms = config.playback.cooldown_ms,
        recording = config.recording.enabled,
        "Configuration loaded"
    );

    let state = ClientState::new(config);

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let player = RodioPlayer::spawn(events_tx)?;
    let surface = ConsoleSurface::new(std::io::stdout());

    setup_signal_handlers();

    // Each stdin line is one command; unknown ones are reported and skipped
    let commands = LinesStream::new(BufReader::new(tokio::io::stdin()).lines()).filter_map(|line| {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "Failed to read console input");
                return None;
            }
        };
        if line.trim().is_empty() {
            return None;
        }
        match line.parse::<ConsoleCommand>() {
            Ok(command) => Some(command),
            Err(e) => {
                warn!("{} (try start, stop, replay, status, quit)", e);
                None
            }
        }
    });

    println!("Commands: start, stop, replay, status, quit");

    let mut session = ClientSession::new(state.clone(), player, events_rx, surface);
    let span = tracing::info_span!("session", id = %session.id());
    session.run(commands, wait_for_shutdown()).instrument(span).await;

    match serde_json::to_string(&state.metrics_snapshot()) {
        Ok(metrics) => info!(uptime_seconds = state.uptime_seconds(), %metrics, "Final metrics"),
        Err(e) => warn!(error = %e, "Could not serialize final metrics"),
    }

    info!("Client stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// ## Environment Variables:
/// - `RUST_LOG`: Controls what gets logged (e.g. "info", "voice_link_client=trace")
/// - If not set, defaults to "voice_link_client=debug"
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voice_link_client=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(())
}

/// Set up signal handlers for graceful shutdown.
///
/// SIGTERM and SIGINT both set the global shutdown flag; the session then
/// stops capture in teardown order and exits.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                (Err(e), _) | (_, Err(e)) => {
                    warn!(error = %e, "Failed to install signal handlers, use 'quit' to exit");
                    return;
                }
            };

            tokio::select! {
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT");
                }
            }
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl+C, use 'quit' to exit");
                return;
            }
            info!("Received Ctrl+C");
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Wait for the shutdown signal to be set, checking every 100ms.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
