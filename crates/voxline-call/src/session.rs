//! Call session - the single owner of microphone, connection and speaker.
//!
//! Every input (device chunks, transport events, playback events, hang-up
//! commands) is applied here, one at a time, on the caller's task. The
//! transition table is total: an event that makes no sense in the current phase
//! is logged and dropped, never an error.
//!
//! ```text
//!   Idle ──start_call──▶ Connecting ──Opened──▶ Active
//!                            │                    │
//!                            └──Failed/Closed─────┴──▶ Error
//!   (any) ──end_call──▶ Ending ──▶ Ended
//! ```

use crate::capture::{AudioChunk, AudioInput, CapturePipeline, CpalMicrophone};
use crate::config::{CallConfig, DeviceDeniedPolicy};
use crate::error::{CallError, CallResult};
use crate::event::{PlaybackEvent, SessionEvent, TransportEvent};
use crate::interrupt::{self, Interruption};
use crate::playback::{ClipRenderer, PlaybackManager, PlaybackState, RodioSpeaker};
use crate::protocol::{self, Inbound};
use crate::transport::{Connector, TransportChannel, WsConnector};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Lifecycle of the call as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    /// Connected; recording and playback flags vary independently.
    Active,
    /// The connection is gone (or was never configured). Waits for `end_call`.
    Error,
    Ending,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Stopped,
    Recording,
}

/// Read-only snapshot for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStatus {
    pub phase: SessionPhase,
    pub connection: ConnectionState,
    pub recording: RecordingState,
    pub playback: PlaybackState,
    pub last_error: Option<String>,
    pub chunks_sent: u64,
    /// Captured while not connected, or rejected by the transport.
    pub chunks_dropped: u64,
    pub clips_played: u64,
    pub interruptions: u64,
}

impl Default for CallStatus {
    fn default() -> Self {
        Self {
            phase: SessionPhase::Idle,
            connection: ConnectionState::Idle,
            recording: RecordingState::Stopped,
            playback: PlaybackState::Silent,
            last_error: None,
            chunks_sent: 0,
            chunks_dropped: 0,
            clips_played: 0,
            interruptions: 0,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct CallStats {
    chunks_sent: u64,
    chunks_dropped: u64,
    clips_played: u64,
    interruptions: u64,
}

/// Fired once when the call reaches `Ended`.
pub type CallEndedHook = Box<dyn FnOnce()>;

enum CallCommand {
    End { done: oneshot::Sender<()> },
}

/// Cloneable, `Send` handle for other tasks (signal handlers, UIs).
#[derive(Clone)]
pub struct CallHandle {
    commands: mpsc::UnboundedSender<CallCommand>,
    status: watch::Receiver<CallStatus>,
}

impl CallHandle {
    /// Ask the session to hang up; resolves once teardown has run.
    ///
    /// Resolves immediately if the session no longer exists.
    pub async fn end_call(&self) {
        let (done, wait) = oneshot::channel();
        if self.commands.send(CallCommand::End { done }).is_err() {
            return;
        }
        let _ = wait.await;
    }

    pub fn status(&self) -> CallStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status.clone()
    }
}

pub struct CallSession {
    config: CallConfig,
    phase: SessionPhase,
    connection: ConnectionState,
    recording: RecordingState,
    last_error: Option<CallError>,
    stats: CallStats,

    connector: Box<dyn Connector>,
    transport: Option<Box<dyn TransportChannel>>,
    capture: CapturePipeline,
    playback: PlaybackManager,

    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    commands_tx: mpsc::UnboundedSender<CallCommand>,
    commands_rx: mpsc::UnboundedReceiver<CallCommand>,
    status_tx: watch::Sender<CallStatus>,

    on_call_ended: Option<CallEndedHook>,
}

impl CallSession {
    pub fn new(
        config: CallConfig,
        connector: Box<dyn Connector>,
        microphone: Box<dyn AudioInput>,
        speaker: Box<dyn ClipRenderer>,
    ) -> CallResult<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(CallStatus::default());

        Ok(Self {
            config,
            phase: SessionPhase::Idle,
            connection: ConnectionState::Idle,
            recording: RecordingState::Stopped,
            last_error: None,
            stats: CallStats::default(),
            connector,
            transport: None,
            capture: CapturePipeline::new(microphone),
            playback: PlaybackManager::new(speaker, events_tx.clone()),
            events_tx,
            events_rx,
            commands_tx,
            commands_rx,
            status_tx,
            on_call_ended: None,
        })
    }

    /// WebSocket transport, default microphone and default speakers.
    pub fn with_system_devices(config: CallConfig) -> CallResult<Self> {
        Self::new(
            config,
            Box::new(WsConnector::new()),
            Box::new(CpalMicrophone::new()),
            Box::new(RodioSpeaker::new()?),
        )
    }

    /// Register the "call ended" notification.
    pub fn on_call_ended(mut self, hook: impl FnOnce() + 'static) -> Self {
        self.on_call_ended = Some(Box::new(hook));
        self
    }

    pub fn handle(&self) -> CallHandle {
        CallHandle {
            commands: self.commands_tx.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CallStatus> {
        self.status_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.state()
    }

    pub fn last_error(&self) -> Option<&CallError> {
        self.last_error.as_ref()
    }

    pub fn status(&self) -> CallStatus {
        CallStatus {
            phase: self.phase,
            connection: self.connection,
            recording: self.recording,
            playback: self.playback.state(),
            last_error: self.last_error.as_ref().map(|e| e.to_string()),
            chunks_sent: self.stats.chunks_sent,
            chunks_dropped: self.stats.chunks_dropped,
            clips_played: self.stats.clips_played,
            interruptions: self.stats.interruptions,
        }
    }

    /// Connect (if an endpoint is configured) and open the microphone.
    ///
    /// Only valid from `Idle`; otherwise a `Usage` error and nothing changes. A
    /// missing microphone is recorded in `last_error` and handled per
    /// `on_device_denied`; under `EndCall` the call is hung up and the error is
    /// also returned.
    pub fn start_call(&mut self) -> CallResult<()> {
        if self.phase != SessionPhase::Idle {
            let err = CallError::Usage(format!("cannot start a call while {:?}", self.phase));
            warn!("{}", err);
            return Err(err);
        }
        let endpoint = self.config.endpoint_url()?;

        info!("📞 Starting call");
        self.phase = SessionPhase::Connecting;

        match endpoint {
            Some(url) => {
                self.connection = ConnectionState::Connecting;
                self.transport = Some(self.connector.connect(&url, self.events_tx.clone()));
            }
            None => {
                warn!("No voice server endpoint configured; running in demo mode");
                self.connection = ConnectionState::Disconnected;
                self.phase = SessionPhase::Error;
                self.record_error(CallError::TransportConnect(
                    "no endpoint configured (demo mode)".into(),
                ));
            }
        }

        let params = self.config.capture_params();
        if let Err(e) = self.capture.start(&params) {
            self.record_error(e.clone());
            if self.config.on_device_denied == DeviceDeniedPolicy::EndCall {
                warn!("Microphone unavailable; ending call");
                self.end_call();
                return Err(e);
            }
            warn!("Microphone unavailable; continuing playback-only");
        } else {
            self.recording = RecordingState::Recording;
            info!("🎤 Recording");
        }

        self.publish();
        Ok(())
    }

    /// Hang up. Valid in every phase; only the first call does anything.
    ///
    /// Order: microphone released, connection closing, playback cut, error
    /// cleared, then the call-ended hook. The close handshake may still be in
    /// flight when this returns.
    pub fn end_call(&mut self) {
        if self.phase == SessionPhase::Ended {
            debug!("end_call: already ended");
            return;
        }
        info!("📴 Ending call");
        self.phase = SessionPhase::Ending;

        if self.capture.stop() {
            debug!("microphone released");
        }
        self.recording = RecordingState::Stopped;

        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                warn!("{}", e);
            }
        }

        interrupt::barge_in(&mut self.playback, Interruption::CallEnding);

        self.last_error = None;
        self.connection = ConnectionState::Ended;
        self.phase = SessionPhase::Ended;
        self.publish();

        if let Some(hook) = self.on_call_ended.take() {
            hook();
        }
        info!(
            sent = self.stats.chunks_sent,
            dropped = self.stats.chunks_dropped,
            clips = self.stats.clips_played,
            interruptions = self.stats.interruptions,
            "Call ended"
        );
    }

    /// Apply one transport or playback event.
    pub fn handle_event(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::Transport(event) => self.on_transport(event),
            SessionEvent::Playback(event) => self.on_playback(event),
        }
        self.publish();
    }

    /// A fresh microphone chunk: cut playback, then send.
    pub fn on_captured(&mut self, chunk: AudioChunk) {
        if matches!(self.phase, SessionPhase::Ending | SessionPhase::Ended) {
            debug!(sequence = chunk.sequence(), "chunk after hang-up ignored");
            return;
        }

        if interrupt::barge_in(&mut self.playback, Interruption::UserSpeech) {
            self.stats.interruptions += 1;
        }
        self.send_chunk(chunk);
        self.publish();
    }

    /// Apply every command and event already queued, without waiting.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(command) = self.commands_rx.try_recv() {
            self.on_command(command);
            handled += 1;
        }
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Wait for the next input and apply it. Returns false once the call has ended.
    ///
    /// Commands take priority over events, and events over new chunks.
    pub async fn step(&mut self) -> bool {
        if self.phase == SessionPhase::Ended {
            return false;
        }
        let capturing = self.capture.is_running();

        tokio::select! {
            biased;

            Some(command) = self.commands_rx.recv() => self.on_command(command),

            Some(event) = self.events_rx.recv() => self.handle_event(event),

            chunk = self.capture.next_chunk(), if capturing => match chunk {
                Some(Ok(chunk)) => self.on_captured(chunk),
                Some(Err(e)) => {
                    self.record_error(e);
                    self.publish();
                }
                None => self.on_capture_ended(),
            },
        }

        self.phase != SessionPhase::Ended
    }

    /// Drive the call until it has ended.
    pub async fn run(&mut self) {
        while self.step().await {}
    }

    fn on_command(&mut self, command: CallCommand) {
        match command {
            CallCommand::End { done } => {
                self.end_call();
                let _ = done.send(());
            }
        }
    }

    fn on_transport(&mut self, event: TransportEvent) {
        if matches!(
            self.phase,
            SessionPhase::Idle | SessionPhase::Ending | SessionPhase::Ended
        ) {
            debug!(?event, phase = ?self.phase, "transport event outside a live call ignored");
            return;
        }

        match event {
            TransportEvent::Opened => {
                if self.phase == SessionPhase::Connecting {
                    info!("🟢 Call connected");
                    self.phase = SessionPhase::Active;
                    self.connection = ConnectionState::Connected;
                    // A device problem outlives the connection coming up.
                    if self.last_error.as_ref().is_some_and(CallError::is_transport) {
                        self.last_error = None;
                    }
                } else {
                    debug!(phase = ?self.phase, "unexpected open ignored");
                }
            }

            TransportEvent::Message(text) => {
                if self.connection != ConnectionState::Connected {
                    debug!(connection = ?self.connection, "message on a dead connection ignored");
                    return;
                }
                match protocol::decode_inbound(&text) {
                    Ok(Inbound::SynthesizedAudio(audio)) => self.play(audio),
                    Ok(Inbound::ServerError(message)) => self.record_error(CallError::Server(message)),
                    Ok(Inbound::Ignored(what)) => debug!("inbound message ignored: {}", what),
                    Err(e) => self.record_error(e),
                }
            }

            TransportEvent::Binary(len) => {
                if self.connection == ConnectionState::Connected {
                    self.record_error(CallError::ProtocolDecode(format!(
                        "unexpected binary frame ({} bytes)",
                        len
                    )));
                }
            }

            TransportEvent::Failed(detail) => {
                let err = match self.connection {
                    ConnectionState::Connecting => CallError::TransportConnect(detail),
                    _ => CallError::TransportLost(detail),
                };
                self.connection_lost();
                self.record_error(err);
            }

            TransportEvent::Closed { code, reason } => {
                let was_live = matches!(
                    self.connection,
                    ConnectionState::Connecting | ConnectionState::Connected
                );
                info!(code, reason = %reason, "Connection closed; not reconnecting");
                self.connection_lost();
                // Failed already explained an abnormal close.
                if was_live {
                    let detail = if reason.is_empty() {
                        format!("closed with code {}", code)
                    } else {
                        format!("closed with code {} ({})", code, reason)
                    };
                    self.record_error(CallError::TransportLost(detail));
                }
            }
        }
    }

    fn on_playback(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Finished(clip) => {
                self.playback.on_finished(clip);
            }
            PlaybackEvent::Failed(clip, detail) => {
                if let Some(err) = self.playback.on_failed(clip, detail) {
                    self.record_error(err);
                }
            }
        }
    }

    fn on_capture_ended(&mut self) {
        self.recording = RecordingState::Stopped;
        self.record_error(CallError::CaptureStream("microphone stream ended".into()));
        self.publish();
    }

    /// The channel is terminal once it closes or fails; no redial is attempted.
    fn connection_lost(&mut self) {
        self.connection = ConnectionState::Disconnected;
        self.phase = SessionPhase::Error;
        self.transport = None;
    }

    fn play(&mut self, audio: Bytes) {
        match self.playback.play(audio) {
            Ok(_) => self.stats.clips_played += 1,
            Err(e) => self.record_error(e),
        }
    }

    fn send_chunk(&mut self, chunk: AudioChunk) {
        let transport = match self.transport.as_mut() {
            Some(transport) if self.connection == ConnectionState::Connected => transport,
            _ => {
                self.stats.chunks_dropped += 1;
                debug!(
                    sequence = chunk.sequence(),
                    connection = ?self.connection,
                    "chunk dropped: not connected"
                );
                return;
            }
        };

        match transport.send(&protocol::outbound_audio(&chunk)) {
            Ok(()) => {
                self.stats.chunks_sent += 1;
                debug!(
                    sequence = chunk.sequence(),
                    bytes = chunk.data().len(),
                    "audio chunk sent"
                );
            }
            Err(e) => {
                self.stats.chunks_dropped += 1;
                self.record_error(e);
            }
        }
    }

    fn record_error(&mut self, err: CallError) {
        if err.is_playback() {
            warn!("{}", err);
        } else {
            error!("{}", err);
        }
        self.last_error = Some(err);
    }

    fn publish(&self) {
        self.status_tx.send_replace(self.status());
    }
}

impl Drop for CallSession {
    fn drop(&mut self) {
        if self.phase != SessionPhase::Ended {
            self.end_call();
        }
    }
}
