//! # Capture Pipeline
//!
//! Bridges the default microphone to the transport channel in fixed time slices.
//!
//! ## How it works:
//! 1. Open the default input device, preferring a 16kHz configuration
//! 2. Every device callback is framed into `block_size`-sample mono blocks
//!    (resampling when the device could not open at 16kHz)
//! 3. Each block is encoded to PCM and written to the channel, but only while the
//!    channel is open. Otherwise the block is dropped and logged: no retry, no
//!    buffering of unsent audio
//!
//! ## Teardown order:
//! Detach the processing graph, release the input device, then close the channel
//! if it is still open. Stopping is idempotent and safe before any start.
//!
//! ## Rust Concepts:
//! - **cpal callbacks** run on a thread owned by the audio backend, so everything
//!   they capture (`BlockDispatcher`) must be `Send + 'static`
//! - **Option<cpal::Stream>**: dropping the stream is what actually detaches it

use crate::audio::buffer::{BlockFramer, RecordingBuffer};
use crate::audio::pcm::AudioFrame;
use crate::config::AudioConfig;
use crate::error::{ClientError, ClientResult};
use crate::state::ClientState;
use crate::websocket::ChannelHandle;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, SupportedStreamConfig};
use tracing::{debug, error, info, trace, warn};

/// Sends finished capture blocks to the transport channel.
///
/// Lives inside the device callback. Owns clones of the shared handles only.
#[derive(Debug, Clone)]
pub struct BlockDispatcher {
    channel: ChannelHandle,
    state: ClientState,
    recording: Option<RecordingBuffer>,
}

impl BlockDispatcher {
    pub fn new(channel: ChannelHandle, state: ClientState, recording: Option<RecordingBuffer>) -> Self {
        Self {
            channel,
            state,
            recording,
        }
    }

    /// Encode one block and hand it to the channel.
    pub fn dispatch(&self, block: &[f32]) {
        if let Some(recording) = &self.recording {
            recording.push_block(block);
        }

        let frame = AudioFrame::encode(block);
        let samples = frame.len();

        match self.channel.send_frame(frame) {
            Ok(()) => {
                self.state.record_frame_sent();
                trace!(samples, "Capture block sent");
            }
            Err(e) => {
                self.state.record_frame_dropped();
                debug!(samples, error = %e, "Capture block dropped");
            }
        }
    }
}

/// Owns the live input stream while capture is running.
pub struct CapturePipeline {
    config: AudioConfig,
    device: Option<cpal::Device>,
    stream: Option<cpal::Stream>,
}

impl CapturePipeline {
    pub fn new(config: AudioConfig) -> Self {
        Self {
            config,
            device: None,
            stream: None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    /// Acquire the microphone and start streaming blocks through `dispatcher`.
    ///
    /// Any refusal from the OS or the audio backend comes back as
    /// `ClientError::PermissionDenied`; nothing is left half-open in that case.
    pub fn start(&mut self, dispatcher: BlockDispatcher) -> ClientResult<()> {
        if self.is_capturing() {
            warn!("Capture already running, ignoring start");
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| ClientError::PermissionDenied("no input device available".to_string()))?;

        let supported = select_input_config(&device, self.config.sample_rate)?;
        let sample_format = supported.sample_format();
        let stream_config = supported.config();
        let channels = stream_config.channels as usize;
        let source_rate = stream_config.sample_rate.0;

        info!(
            device = %device.name().unwrap_or_else(|_| "unknown".to_string()),
            source_rate,
            channels,
            format = ?sample_format,
            target_rate = self.config.sample_rate,
            block_size = self.config.block_size,
            "Opening input stream"
        );

        let mut framer = BlockFramer::new(self.config.block_size, source_rate, self.config.sample_rate);
        let on_error = |err: cpal::StreamError| error!(error = %err, "Input stream error");

        let stream = match sample_format {
            SampleFormat::F32 => device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    framer.push_interleaved(data, channels, |block| dispatcher.dispatch(block));
                },
                on_error,
                None,
            )?,
            SampleFormat::I16 => {
                let mut converted: Vec<f32> = Vec::new();
                device.build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        converted.clear();
                        converted.extend(data.iter().map(|&s| s as f32 / 32768.0));
                        framer.push_interleaved(&converted, channels, |block| dispatcher.dispatch(block));
                    },
                    on_error,
                    None,
                )?
            }
            other => {
                return Err(ClientError::PermissionDenied(format!(
                    "unsupported input sample format {:?}",
                    other
                )));
            }
        };

        stream.play()?;

        self.stream = Some(stream);
        self.device = Some(device);
        info!("Capture started");
        Ok(())
    }

    /// Tear capture down: graph, then device, then channel.
    pub fn stop(&mut self, channel: Option<&ChannelHandle>) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                debug!(error = %e, "Pausing input stream failed, dropping it anyway");
            }
            drop(stream);
            info!("Processing graph detached");
        }

        if self.device.take().is_some() {
            info!("Input device released");
        }

        if let Some(channel) = channel {
            if channel.close() {
                info!("Transport channel closed");
            }
        }
    }
}

/// Prefer a mono-most configuration that can run at the wire rate directly;
/// fall back to the device default and resample.
fn select_input_config(device: &cpal::Device, target_rate: u32) -> ClientResult<SupportedStreamConfig> {
    let target = SampleRate(target_rate);

    let exact = device
        .supported_input_configs()?
        .filter(|range| matches!(range.sample_format(), SampleFormat::F32 | SampleFormat::I16))
        .filter(|range| range.min_sample_rate() <= target && range.max_sample_rate() >= target)
        .min_by_key(|range| range.channels());

    match exact {
        Some(range) => Ok(range.with_sample_rate(target)),
        None => Ok(device.default_input_config()?),
    }
}
