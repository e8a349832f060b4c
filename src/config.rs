//! # Configuration Management
//!
//! This module handles loading and managing client configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `VOICE_LINK_URL` (shortcut for the remote endpoint)
//! 2. Environment variables (APP_SERVER__URL, APP_PLAYBACK__COOLDOWN_MS, etc.)
//! 3. Configuration file (config.toml)
//! 4. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Main client configuration that contains all settings.
///
/// ## Why separate config structs:
/// Breaking configuration into logical groups (server, audio, playback, recording)
/// keeps each concern's knobs next to each other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub playback: PlaybackConfig,
    pub recording: RecordingConfig,
}

/// Remote endpoint settings.
///
/// ## Fields:
/// - `url`: WebSocket endpoint of the speech service (`ws://` or `wss://`)
/// - `connect_timeout_ms`: How long to wait for the handshake before giving up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub url: String,
    pub connect_timeout_ms: u64,
}

/// Capture settings.
///
/// ## Fields:
/// - `sample_rate`: Rate of the PCM stream put on the wire (16kHz for the service)
/// - `block_size`: Number of samples per outbound frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
}

/// Backend playback settings.
///
/// ## Fields:
/// - `cooldown_ms`: How long inbound audio is dropped after a flush
/// - `clear_command`: Text message that triggers a flush
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub cooldown_ms: u64,
    pub clear_command: String,
}

/// Optional local recording of the captured microphone audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    pub enabled: bool,
    pub output_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                url: "ws://127.0.0.1:8000/ws".to_string(),
                connect_timeout_ms: 5000,
            },
            audio: AudioConfig {
                sample_rate: 16000, // What the speech service expects
                block_size: 4096,   // 256ms per frame at 16kHz
            },
            playback: PlaybackConfig {
                cooldown_ms: 500,
                clear_command: "$clear$".to_string(),
            },
            recording: RecordingConfig {
                enabled: false,
                output_path: PathBuf::from("recording.wav"),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the VOICE_LINK_URL shortcut
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER__URL=wss://speech.local:8000/ws`: Override the endpoint
    /// - `APP_PLAYBACK__COOLDOWN_MS=750`: Override the flush cooldown
    /// - `APP_RECORDING__ENABLED=true`: Keep a local WAV of the session
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            // Double underscore separates sections so field names may contain `_`
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(url) = env::var("VOICE_LINK_URL") {
            settings = settings.set_override("server.url", url)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// ## What this checks:
    /// - The endpoint is a ws:// or wss:// URL
    /// - Sample rate, block size and cooldown are non-zero
    /// - The flush command is not empty (an empty command would match nothing useful)
    /// - A recording path is present when recording is enabled
    pub fn validate(&self) -> Result<()> {
        let url = self.server.url.trim();
        if url.is_empty() {
            return Err(anyhow::anyhow!("Server URL cannot be empty"));
        }

        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(anyhow::anyhow!(
                "Server URL must use ws:// or wss://, got '{}'",
                url
            ));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.audio.block_size == 0 {
            return Err(anyhow::anyhow!("Block size must be greater than 0"));
        }

        if self.playback.cooldown_ms == 0 {
            return Err(anyhow::anyhow!("Flush cooldown must be greater than 0"));
        }

        if self.playback.clear_command.is_empty() {
            return Err(anyhow::anyhow!("Clear command cannot be empty"));
        }

        if self.recording.enabled && self.recording.output_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!(
                "Recording output path is required when recording is enabled"
            ));
        }

        Ok(())
    }
}

impl ServerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl PlaybackConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.block_size, 4096);
        assert_eq!(config.playback.cooldown(), Duration::from_millis(500));
        assert_eq!(config.playback.clear_command, "$clear$");
        assert!(!config.recording.enabled);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.url = "http://127.0.0.1:8000/ws".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.block_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.playback.cooldown_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.recording.enabled = true;
        config.recording.output_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secure_websocket_url_is_accepted() {
        let mut config = AppConfig::default();
        config.server.url = "wss://10.0.0.5:8000/ws".to_string();
        assert!(config.validate().is_ok());
    }

    /// The defaults must survive the round trip through the `config` crate,
    /// since `load` seeds the builder with them.
    #[test]
    fn test_defaults_seed_config_builder() {
        let built = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default()).unwrap())
            .build()
            .unwrap();
        let config: AppConfig = built.try_deserialize().unwrap();
        assert_eq!(config.server.url, "ws://127.0.0.1:8000/ws");
        assert_eq!(config.server.connect_timeout(), Duration::from_secs(5));
    }
}
