//! # Client Session
//!
//! One run of the client: the event loop that owns the playback coordinator, the
//! capture pipeline, the channel and the control surface.
//!
//! ## Event Sources:
//! 1. **Inbound messages** from the channel reader, strictly in arrival order
//! 2. **Player reports** (`ClipFinished`) from the playback thread
//! 3. **Cooldown deadline** of an active flush
//! 4. **Connection result** of a `start` in progress
//! 5. **Console commands** (`start`, `stop`, `replay`, `status`, `quit`)
//! 6. **Shutdown** (signal handler)
//!
//! Everything runs on this one task, so the coordinator and the surface are
//! mutated without locks. The `select!` only decides which event comes next;
//! the event is handled after it returns. No handler awaits: the WebSocket
//! handshake runs on its own task and comes back as an event, so flush
//! deadlines and player reports keep flowing while it is pending.

use crate::audio::buffer::RecordingBuffer;
use crate::audio::capture::{BlockDispatcher, CapturePipeline};
use crate::audio::wav::write_wav_file;
use crate::error::{ClientError, ClientResult};
use crate::playback::coordinator::PlaybackCoordinator;
use crate::playback::player::{ClipFinished, ClipPlayer};
use crate::state::ClientState;
use crate::surface::{Control, ControlSurface};
use crate::websocket::{self, ChannelHandle, ControlSignal, InboundMessage};
use futures_util::{Stream, StreamExt};
use std::future::{pending, Future};
use std::str::FromStr;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const STATUS_WS_OPENED: &str = "WebSocket connection opened";
pub const STATUS_WS_ERROR: &str = "WebSocket error, check the connection";
pub const STATUS_WS_CLOSED: &str = "WebSocket connection closed";

/// Write handle and inbound stream of a freshly opened channel.
type Connection = (ChannelHandle, mpsc::UnboundedReceiver<InboundMessage>);

/// Commands typed on the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleCommand {
    Start,
    Stop,
    Replay,
    Status,
    Quit,
}

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Ok(ConsoleCommand::Start),
            "stop" => Ok(ConsoleCommand::Stop),
            "replay" | "play" => Ok(ConsoleCommand::Replay),
            "status" => Ok(ConsoleCommand::Status),
            "quit" | "exit" => Ok(ConsoleCommand::Quit),
            other => Err(format!("unknown command '{}'", other)),
        }
    }
}

impl ConsoleCommand {
    /// The control a command needs enabled, if any.
    fn control(&self) -> Option<Control> {
        match self {
            ConsoleCommand::Start => Some(Control::StartCapture),
            ConsoleCommand::Stop => Some(Control::StopCapture),
            ConsoleCommand::Replay => Some(Control::PlayBackendClips),
            ConsoleCommand::Status | ConsoleCommand::Quit => None,
        }
    }
}

/// What woke the event loop.
enum Event {
    Inbound(Option<InboundMessage>),
    ClipFinished(ClipFinished),
    CooldownElapsed,
    Connected(ClientResult<Connection>),
    Command(Option<ConsoleCommand>),
    Shutdown,
}

pub struct ClientSession<P: ClipPlayer, S: ControlSurface> {
    id: Uuid,
    state: ClientState,
    coordinator: PlaybackCoordinator<P>,
    surface: S,
    capture: CapturePipeline,
    channel: Option<ChannelHandle>,
    inbound: Option<mpsc::UnboundedReceiver<InboundMessage>>,
    connecting: Option<JoinHandle<ClientResult<Connection>>>,
    player_events: mpsc::UnboundedReceiver<ClipFinished>,
    recording: Option<RecordingBuffer>,
}

impl<P: ClipPlayer, S: ControlSurface> ClientSession<P, S> {
    pub fn new(
        state: ClientState,
        player: P,
        player_events: mpsc::UnboundedReceiver<ClipFinished>,
        surface: S,
    ) -> Self {
        let capture = CapturePipeline::new(state.config().audio.clone());
        Self {
            id: Uuid::new_v4(),
            coordinator: PlaybackCoordinator::new(player, state.clone()),
            state,
            surface,
            capture,
            channel: None,
            inbound: None,
            connecting: None,
            player_events,
            recording: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    #[cfg(test)]
    pub fn surface(&self) -> &S {
        &self.surface
    }

    #[cfg(test)]
    pub fn coordinator(&self) -> &PlaybackCoordinator<P> {
        &self.coordinator
    }

    /// Use `channel` for outbound frames and `inbound` as the message source,
    /// closing whatever channel was attached before.
    ///
    /// Messages the previous channel had already delivered are handled first,
    /// so no transcript line or clip is lost in the swap.
    pub fn attach(&mut self, channel: ChannelHandle, inbound: mpsc::UnboundedReceiver<InboundMessage>) {
        if let Some(previous) = self.channel.replace(channel) {
            if previous.close() {
                debug!("Replaced an open channel");
            }
        }
        if let Some(mut previous) = self.inbound.take() {
            while let Ok(message) = previous.try_recv() {
                self.handle_inbound(message);
            }
        }
        self.inbound = Some(inbound);
    }

    /// Drive the session until `quit` or `shutdown` resolves, then tear down.
    pub async fn run<C, F>(&mut self, mut commands: C, shutdown: F)
    where
        C: Stream<Item = ConsoleCommand> + Unpin,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut commands_open = true;
        info!(session_id = %self.id, "Session started");

        loop {
            let deadline = self.coordinator.block_expires_at();

            let event = tokio::select! {
                biased;

                _ = &mut shutdown => Event::Shutdown,
                message = next_inbound(&mut self.inbound) => Event::Inbound(message),
                Some(finished) = self.player_events.recv() => Event::ClipFinished(finished),
                _ = cooldown(deadline) => Event::CooldownElapsed,
                result = next_connection(&mut self.connecting) => Event::Connected(result),
                command = commands.next(), if commands_open => Event::Command(command),
            };

            match event {
                Event::Inbound(Some(message)) => self.handle_inbound(message),
                Event::Inbound(None) => {
                    debug!("Inbound stream ended");
                    self.inbound = None;
                }
                Event::ClipFinished(finished) => self.coordinator.on_clip_finished(finished),
                Event::CooldownElapsed => self.coordinator.on_cooldown_elapsed(&mut self.surface),
                Event::Connected(result) => {
                    self.connecting = None;
                    self.on_connected(result);
                }
                Event::Command(Some(ConsoleCommand::Quit)) => {
                    info!("Quit requested");
                    break;
                }
                Event::Command(Some(command)) => self.handle_command(command),
                Event::Command(None) => {
                    debug!("Console input closed");
                    commands_open = false;
                }
                Event::Shutdown => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.teardown();
        info!(session_id = %self.id, "Session finished");
    }

    fn handle_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Control(ControlSignal::Flush) => {
                self.coordinator.on_flush(Instant::now(), &mut self.surface);
            }
            InboundMessage::Transcript(text) => {
                debug!(%text, "Transcript line");
                self.state.record_transcript_line();
                self.surface.transcript(&text);
            }
            InboundMessage::Audio(payload) => {
                self.coordinator.on_clip_arrival(payload, &mut self.surface);
            }
            InboundMessage::Failed(reason) => {
                warn!(%reason, "WebSocket error");
                self.surface.status(STATUS_WS_ERROR);
            }
            InboundMessage::Closed(reason) => {
                info!(reason = reason.as_deref().unwrap_or(""), "WebSocket closed");
                self.surface.status(STATUS_WS_CLOSED);
            }
        }
    }

    fn handle_command(&mut self, command: ConsoleCommand) {
        if let Some(control) = command.control() {
            if !self.surface.is_enabled(control) {
                debug!(?command, "Command refused, control disabled");
                self.surface.status(&format!("'{}' is not available right now", control));
                return;
            }
        }

        match command {
            ConsoleCommand::Start => self.start_capture(),
            ConsoleCommand::Stop => self.stop_capture(),
            ConsoleCommand::Replay => {
                let count = self.coordinator.replay_received();
                self.surface.status(&format!("Replaying {} backend clip(s)", count));
            }
            ConsoleCommand::Status => self.report_status(),
            ConsoleCommand::Quit => {}
        }
    }

    /// Begin the handshake; capture starts once `on_connected` sees it succeed.
    fn start_capture(&mut self) {
        let server = self.state.config().server.clone();
        let clear_command = self.state.config().playback.clear_command.clone();

        self.surface.set_enabled(Control::StartCapture, false);
        self.connecting = Some(tokio::spawn(async move {
            websocket::connect(&server.url, server.connect_timeout(), &clear_command).await
        }));
    }

    fn on_connected(&mut self, result: ClientResult<Connection>) {
        let channel = match result {
            Ok((channel, inbound)) => {
                self.surface.status(STATUS_WS_OPENED);
                self.attach(channel.clone(), inbound);
                channel
            }
            Err(e) => {
                error!(error = %e, "Could not connect to speech service");
                self.surface.status(STATUS_WS_ERROR);
                self.surface.set_enabled(Control::StartCapture, true);
                return;
            }
        };

        let recording = self.state.config().recording.enabled.then(RecordingBuffer::new);
        self.recording = recording.clone();

        let dispatcher = BlockDispatcher::new(channel, self.state.clone(), recording);
        match self.capture.start(dispatcher) {
            Ok(()) => {
                self.surface.set_enabled(Control::StartCapture, false);
                self.surface.set_enabled(Control::StopCapture, true);
                self.surface.status("Capturing microphone audio.");
            }
            Err(e @ ClientError::PermissionDenied(_)) => {
                warn!(error = %e, "Capture did not start");
                self.recording = None;
                self.surface.status(&e.to_string());
                self.surface.set_enabled(Control::StartCapture, true);
            }
            Err(e) => {
                error!(error = %e, "Capture did not start");
                self.recording = None;
                self.surface.status(&format!("Capture failed: {}", e));
                self.surface.set_enabled(Control::StartCapture, true);
            }
        }
    }

    fn stop_capture(&mut self) {
        self.capture.stop(self.channel.as_ref());
        self.export_recording();

        self.surface.set_enabled(Control::StopCapture, false);
        self.surface.set_enabled(Control::StartCapture, true);
        self.surface.status("Capture stopped.");
    }

    fn export_recording(&mut self) {
        let Some(recording) = self.recording.take() else {
            return;
        };

        let samples = recording.take_samples();
        if samples.is_empty() {
            debug!("Recording is empty, nothing to export");
            return;
        }

        let config = &self.state.config().recording;
        let sample_rate = self.state.config().audio.sample_rate;
        match write_wav_file(&config.output_path, &samples, sample_rate) {
            Ok(bytes) => {
                info!(path = %config.output_path.display(), bytes, "Recording saved");
                self.surface
                    .status(&format!("Recording saved to {}", config.output_path.display()));
            }
            Err(e) => {
                error!(path = %config.output_path.display(), error = %e, "Recording export failed");
                self.surface.status(&format!("Could not save recording: {}", e));
            }
        }
    }

    fn report_status(&mut self) {
        let connected = self.channel.as_ref().is_some_and(ChannelHandle::is_open);
        let line = format!(
            "capturing={} connected={} playback={:?} queued={} cooldown={}",
            self.capture.is_capturing(),
            connected,
            self.coordinator.state(),
            self.coordinator.queue_len(),
            self.coordinator.is_blocking(),
        );
        self.surface.status(&line);

        match serde_json::to_string(&self.state.metrics_snapshot()) {
            Ok(json) => self.surface.status(&json),
            Err(e) => warn!(error = %e, "Could not serialize metrics"),
        }
    }

    /// Stop capture (graph, device, channel) and playback at session end.
    fn teardown(&mut self) {
        if let Some(connecting) = self.connecting.take() {
            connecting.abort();
            debug!("Abandoned a pending connection");
        }
        self.capture.stop(self.channel.as_ref());
        self.export_recording();
        self.coordinator.shutdown();
        self.inbound = None;
    }
}

async fn next_inbound(inbound: &mut Option<mpsc::UnboundedReceiver<InboundMessage>>) -> Option<InboundMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => pending().await,
    }
}

async fn next_connection(connecting: &mut Option<JoinHandle<ClientResult<Connection>>>) -> ClientResult<Connection> {
    match connecting {
        Some(task) => match task.await {
            Ok(result) => result,
            Err(e) => Err(ClientError::Transport(format!("connection task failed: {}", e))),
        },
        None => pending().await,
    }
}

async fn cooldown(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::playback::coordinator::{STATUS_PLAYBACK_CLEARED, STATUS_READY_AGAIN};
    use crate::playback::player::fake::FakePlayer;
    use crate::surface::ConsoleSurface;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::sleep;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    type TestSession = ClientSession<FakePlayer, ConsoleSurface<Vec<u8>>>;

    struct Harness {
        session: TestSession,
        inbound: mpsc::UnboundedSender<InboundMessage>,
        commands: mpsc::UnboundedSender<ConsoleCommand>,
        command_stream: Option<UnboundedReceiverStream<ConsoleCommand>>,
        player_events: mpsc::UnboundedSender<ClipFinished>,
    }

    fn harness() -> Harness {
        harness_with(AppConfig::default())
    }

    fn harness_with(config: AppConfig) -> Harness {
        let state = ClientState::new(config);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut session = ClientSession::new(
            state,
            FakePlayer::default(),
            events_rx,
            ConsoleSurface::new(Vec::new()),
        );

        let (channel, _outbound) = ChannelHandle::pair();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        session.attach(channel, inbound_rx);

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        Harness {
            session,
            inbound: inbound_tx,
            commands: commands_tx,
            command_stream: Some(UnboundedReceiverStream::new(commands_rx)),
            player_events: events_tx,
        }
    }

    fn output(session: &TestSession) -> String {
        String::from_utf8(session.surface().get_ref().clone()).unwrap()
    }

    #[test]
    fn test_console_commands_parse() {
        assert_eq!("start".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Start));
        assert_eq!(" STOP \n".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Stop));
        assert_eq!("replay".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Replay));
        assert_eq!("exit".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Quit));
        assert!("dance".parse::<ConsoleCommand>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_clips_are_blocked_for_exactly_the_cooldown() {
        let mut h = harness();
        let commands = h.command_stream.take().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let inbound = h.inbound.clone();

        let driver = async move {
            inbound.send(InboundMessage::Control(ControlSignal::Flush)).unwrap();

            sleep(Duration::from_millis(499)).await;
            inbound.send(InboundMessage::Audio(vec![1, 2, 3])).unwrap();
            inbound
                .send(InboundMessage::Transcript("still listening".to_string()))
                .unwrap();

            sleep(Duration::from_millis(2)).await;
            inbound.send(InboundMessage::Audio(vec![4, 5, 6])).unwrap();

            sleep(Duration::from_millis(10)).await;
            let _ = stop_tx.send(());
        };

        let shutdown = async {
            let _ = stop_rx.await;
        };
        tokio::join!(h.session.run(commands, shutdown), driver);

        // Only the clip sent after the cooldown was accepted, as seq 0
        assert_eq!(h.session.coordinator().player().started, vec![0]);

        let text = output(&h.session);
        assert!(text.contains(STATUS_PLAYBACK_CLEARED));
        assert!(text.contains(": still listening"));
        assert!(text.contains(STATUS_READY_AGAIN));
        let cleared = text.find(STATUS_PLAYBACK_CLEARED).unwrap();
        let transcript = text.find("still listening").unwrap();
        let ready = text.find(STATUS_READY_AGAIN).unwrap();
        assert!(cleared < transcript && transcript < ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_controls_are_refused() {
        let mut h = harness();
        let commands = h.command_stream.take().unwrap();

        h.commands.send(ConsoleCommand::Stop).unwrap();
        h.commands.send(ConsoleCommand::Replay).unwrap();
        h.commands.send(ConsoleCommand::Quit).unwrap();
        h.session.run(commands, pending::<()>()).await;

        let text = output(&h.session);
        assert!(text.contains("'stop' is not available right now"));
        assert!(text.contains("'replay' is not available right now"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_player_reports_advance_the_queue() {
        let mut h = harness();
        let commands = h.command_stream.take().unwrap();

        h.inbound.send(InboundMessage::Audio(vec![1])).unwrap();
        h.inbound.send(InboundMessage::Audio(vec![2])).unwrap();
        h.player_events
            .send(ClipFinished {
                seq: 0,
                outcome: crate::playback::player::PlaybackOutcome::Completed,
            })
            .unwrap();
        h.inbound.send(InboundMessage::Closed(None)).unwrap();

        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let driver = async move {
            sleep(Duration::from_millis(50)).await;
            let _ = stop_tx.send(());
        };
        let shutdown = async {
            let _ = stop_rx.await;
        };
        tokio::join!(h.session.run(commands, shutdown), driver);

        assert_eq!(h.session.coordinator().player().started, vec![0, 1]);
        assert!(output(&h.session).contains(STATUS_WS_CLOSED));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_reports_metrics() {
        let mut h = harness();
        let commands = h.command_stream.take().unwrap();

        h.inbound.send(InboundMessage::Transcript("hi".to_string())).unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let commands_tx = h.commands.clone();
        let driver = async move {
            sleep(Duration::from_millis(5)).await;
            commands_tx.send(ConsoleCommand::Status).unwrap();
            sleep(Duration::from_millis(5)).await;
            let _ = stop_tx.send(());
        };
        let shutdown = async {
            let _ = stop_rx.await;
        };
        tokio::join!(h.session.run(commands, shutdown), driver);

        let text = output(&h.session);
        assert!(text.contains("capturing=false connected=true playback=Idle"));
        assert!(text.contains("\"transcript_lines\":1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_handshake_does_not_hold_up_the_cooldown() {
        // Accepts TCP connections but never answers the WebSocket handshake
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _silent_server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = AppConfig::default();
        config.server.url = format!("ws://{}", addr);
        let mut h = harness_with(config);
        let commands = h.command_stream.take().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let inbound = h.inbound.clone();
        let commands_tx = h.commands.clone();

        let driver = async move {
            inbound.send(InboundMessage::Control(ControlSignal::Flush)).unwrap();

            sleep(Duration::from_millis(100)).await;
            commands_tx.send(ConsoleCommand::Start).unwrap();
            commands_tx.send(ConsoleCommand::Start).unwrap();

            sleep(Duration::from_millis(500)).await;
            inbound.send(InboundMessage::Audio(vec![1, 2, 3])).unwrap();

            sleep(Duration::from_millis(10)).await;
            let _ = stop_tx.send(());
        };

        let shutdown = async {
            let _ = stop_rx.await;
        };
        tokio::join!(h.session.run(commands, shutdown), driver);

        // The clip 600ms after the flush played even though the handshake never finished
        assert_eq!(h.session.coordinator().player().started, vec![0]);

        let text = output(&h.session);
        assert!(text.contains(STATUS_READY_AGAIN));
        assert!(text.contains("'start' is not available right now"));
        assert!(!text.contains(STATUS_WS_ERROR));
        assert!(!text.contains(STATUS_WS_OPENED));
    }

    #[test]
    fn test_attach_handles_messages_left_on_the_old_channel() {
        let mut h = harness();

        h.inbound.send(InboundMessage::Transcript("last words".to_string())).unwrap();
        h.inbound.send(InboundMessage::Audio(vec![7])).unwrap();

        let (channel, _outbound) = ChannelHandle::pair();
        let (_new_inbound, new_rx) = mpsc::unbounded_channel();
        h.session.attach(channel, new_rx);

        assert!(output(&h.session).contains(": last words"));
        assert_eq!(h.session.coordinator().player().started, vec![0]);
    }
}
