//! In-memory devices and server for driving a `CallSession` without hardware or network.
//!
//! Every fake writes to one shared journal so tests can assert cross-component ordering.

#![allow(dead_code)]

use bytes::Bytes;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use url::Url;
use voxline_call::{
    protocol, AudioInput, CallConfig, CallError, CallResult, CallSession, CaptureFrame,
    CaptureParams, ClipId, ClipNotifier, ClipRenderer, Connector, EventSender, FrameSender,
    InputFormat, RenderHandle, TransportChannel, TransportEvent, TransportMessage,
};

pub const ENDPOINT: &str = "ws://voice.test/call";

/// Samples in one chunk at 16 kHz mono with a 10 ms interval.
pub const CHUNK_SAMPLES: usize = 160;

pub type Journal = Rc<RefCell<Vec<String>>>;

fn note(journal: &Journal, entry: impl Into<String>) {
    journal.borrow_mut().push(entry.into());
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("voxline_call=debug")
        .with_test_writer()
        .try_init();
}

pub fn test_config() -> CallConfig {
    CallConfig {
        endpoint: Some(ENDPOINT.to_string()),
        chunk_interval_ms: 10,
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Microphone

#[derive(Default)]
struct MicState {
    frames: Option<FrameSender>,
    params: Option<CaptureParams>,
}

pub struct FakeMicrophone {
    journal: Journal,
    deny: bool,
    state: Rc<RefCell<MicState>>,
}

impl AudioInput for FakeMicrophone {
    fn open(&mut self, params: &CaptureParams, frames: FrameSender) -> CallResult<InputFormat> {
        if self.deny {
            note(&self.journal, "mic.denied");
            return Err(CallError::DeviceAccess("permission denied by user".into()));
        }
        note(&self.journal, "mic.open");
        let mut state = self.state.borrow_mut();
        state.frames = Some(frames);
        state.params = Some(params.clone());
        Ok(params.into())
    }

    fn release(&mut self) {
        note(&self.journal, "mic.release");
        self.state.borrow_mut().frames = None;
    }
}

/// Test-side control of the fake microphone.
#[derive(Clone)]
pub struct Mic {
    state: Rc<RefCell<MicState>>,
}

impl Mic {
    /// Push exactly one chunk's worth of samples.
    pub fn speak(&self) {
        self.push(CaptureFrame::Samples(vec![1200; CHUNK_SAMPLES]));
    }

    pub fn push(&self, frame: CaptureFrame) {
        if let Some(frames) = self.state.borrow().frames.as_ref() {
            let _ = frames.send(frame);
        }
    }

    /// Simulate the device disappearing mid-call.
    pub fn unplug(&self) {
        self.state.borrow_mut().frames = None;
    }

    pub fn is_open(&self) -> bool {
        self.state.borrow().frames.is_some()
    }

    pub fn params(&self) -> Option<CaptureParams> {
        self.state.borrow().params.clone()
    }
}

// ---------------------------------------------------------------------------
// Server and transport

#[derive(Default)]
struct ServerState {
    events: Option<EventSender>,
    endpoint: Option<Url>,
    open: bool,
    closed: bool,
    connects: usize,
    sent: Vec<TransportMessage>,
}

pub struct FakeConnector {
    journal: Journal,
    state: Rc<RefCell<ServerState>>,
}

impl Connector for FakeConnector {
    fn connect(&mut self, endpoint: &Url, events: EventSender) -> Box<dyn TransportChannel> {
        note(&self.journal, "transport.connect");
        {
            let mut state = self.state.borrow_mut();
            state.events = Some(events);
            state.endpoint = Some(endpoint.clone());
            state.connects += 1;
        }
        Box::new(FakeChannel {
            journal: Rc::clone(&self.journal),
            state: Rc::clone(&self.state),
        })
    }
}

struct FakeChannel {
    journal: Journal,
    state: Rc<RefCell<ServerState>>,
}

impl TransportChannel for FakeChannel {
    fn send(&mut self, message: &TransportMessage) -> CallResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.open || state.closed {
            return Err(CallError::TransportSend("connection is not open".into()));
        }
        note(&self.journal, "transport.send");
        state.sent.push(message.clone());
        Ok(())
    }

    fn close(&mut self) -> CallResult<()> {
        let mut state = self.state.borrow_mut();
        if state.closed {
            return Ok(());
        }
        note(&self.journal, "transport.close");
        state.closed = true;
        state.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        let state = self.state.borrow();
        state.open && !state.closed
    }
}

/// Test-side control of the fake voice server.
#[derive(Clone)]
pub struct Server {
    state: Rc<RefCell<ServerState>>,
}

impl Server {
    fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.state.borrow().events.as_ref() {
            let _ = events.send(event.into());
        }
    }

    pub fn accept(&self) {
        self.state.borrow_mut().open = true;
        self.emit(TransportEvent::Opened);
    }

    pub fn say(&self, audio: &[u8]) {
        let frame = serde_json::json!({
            "type": "tts_chunk",
            "data": protocol::encode_payload(audio),
        });
        self.send_text(&frame.to_string());
    }

    pub fn send_text(&self, text: &str) {
        self.emit(TransportEvent::Message(text.to_string()));
    }

    /// Drop the connection the way a network failure would.
    pub fn drop_connection(&self, code: u16) {
        self.state.borrow_mut().open = false;
        self.emit(TransportEvent::Closed {
            code,
            reason: String::new(),
        });
    }

    pub fn refuse(&self, detail: &str) {
        self.emit(TransportEvent::Failed(detail.to_string()));
        self.emit(TransportEvent::Closed {
            code: 1006,
            reason: String::new(),
        });
    }

    pub fn connects(&self) -> usize {
        self.state.borrow().connects
    }

    pub fn endpoint(&self) -> Option<Url> {
        self.state.borrow().endpoint.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().closed
    }

    /// Decoded payloads of every `audio_chunk` received so far.
    pub fn received_audio(&self) -> Vec<Bytes> {
        self.state
            .borrow()
            .sent
            .iter()
            .filter_map(|message| match message {
                TransportMessage::AudioChunk { data } => protocol::decode_payload(data).ok(),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Speaker

#[derive(Default)]
struct SpeakerState {
    notifiers: Vec<ClipNotifier>,
    started: Vec<ClipId>,
    stopped: Vec<ClipId>,
    reject_next: Option<CallError>,
}

pub struct FakeSpeaker {
    journal: Journal,
    state: Rc<RefCell<SpeakerState>>,
}

struct FakeClip {
    id: ClipId,
    journal: Journal,
    state: Rc<RefCell<SpeakerState>>,
}

impl RenderHandle for FakeClip {
    fn stop(&mut self) {
        note(&self.journal, format!("speaker.stop {}", self.id));
        self.state.borrow_mut().stopped.push(self.id);
    }
}

impl ClipRenderer for FakeSpeaker {
    fn start(
        &mut self,
        clip: ClipId,
        _audio: Bytes,
        notifier: ClipNotifier,
    ) -> CallResult<Box<dyn RenderHandle>> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.reject_next.take() {
            note(&self.journal, format!("speaker.reject {}", clip));
            return Err(err);
        }
        note(&self.journal, format!("speaker.start {}", clip));
        state.started.push(clip);
        state.notifiers.push(notifier);
        Ok(Box::new(FakeClip {
            id: clip,
            journal: Rc::clone(&self.journal),
            state: Rc::clone(&self.state),
        }))
    }
}

/// Test-side control of the fake speaker.
#[derive(Clone)]
pub struct Speaker {
    state: Rc<RefCell<SpeakerState>>,
}

impl Speaker {
    /// Report natural completion of `clip`, as the device callback would.
    pub fn finish(&self, clip: ClipId) {
        let state = self.state.borrow();
        if let Some(notifier) = state.notifiers.iter().find(|n| n.clip() == clip) {
            notifier.finished();
        }
    }

    pub fn fail(&self, clip: ClipId, detail: &str) {
        let state = self.state.borrow();
        if let Some(notifier) = state.notifiers.iter().find(|n| n.clip() == clip) {
            notifier.failed(detail);
        }
    }

    pub fn reject_next(&self, err: CallError) {
        self.state.borrow_mut().reject_next = Some(err);
    }

    pub fn started(&self) -> Vec<ClipId> {
        self.state.borrow().started.clone()
    }

    pub fn stopped(&self) -> Vec<ClipId> {
        self.state.borrow().stopped.clone()
    }
}

// ---------------------------------------------------------------------------
// Rig

pub struct Rig {
    pub session: CallSession,
    pub mic: Mic,
    pub server: Server,
    pub speaker: Speaker,
    pub journal: Journal,
}

impl Rig {
    pub fn new(config: CallConfig) -> Self {
        Self::build(config, false)
    }

    pub fn with_denied_microphone(config: CallConfig) -> Self {
        Self::build(config, true)
    }

    fn build(config: CallConfig, deny: bool) -> Self {
        init_tracing();
        let journal: Journal = Rc::new(RefCell::new(Vec::new()));
        let mic_state = Rc::new(RefCell::new(MicState::default()));
        let server_state = Rc::new(RefCell::new(ServerState::default()));
        let speaker_state = Rc::new(RefCell::new(SpeakerState::default()));

        let ended = Rc::clone(&journal);
        let session = CallSession::new(
            config,
            Box::new(FakeConnector {
                journal: Rc::clone(&journal),
                state: Rc::clone(&server_state),
            }),
            Box::new(FakeMicrophone {
                journal: Rc::clone(&journal),
                deny,
                state: Rc::clone(&mic_state),
            }),
            Box::new(FakeSpeaker {
                journal: Rc::clone(&journal),
                state: Rc::clone(&speaker_state),
            }),
        )
        .expect("valid test config")
        .on_call_ended(move || note(&ended, "call.ended"));

        Self {
            session,
            mic: Mic { state: mic_state },
            server: Server {
                state: server_state,
            },
            speaker: Speaker {
                state: speaker_state,
            },
            journal,
        }
    }

    /// Start the call and complete the handshake.
    pub fn connected(config: CallConfig) -> Self {
        let mut rig = Self::new(config);
        rig.session.start_call().expect("start_call");
        rig.server.accept();
        rig.session.process_pending();
        rig
    }

    /// Apply exactly one input, failing the test if nothing arrives.
    pub async fn step(&mut self) -> bool {
        tokio::time::timeout(Duration::from_secs(1), self.session.step())
            .await
            .expect("session made no progress")
    }

    pub fn journal(&self) -> Vec<String> {
        self.journal.borrow().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.journal.borrow().iter().filter(|e| *e == entry).count()
    }

    pub fn clear_journal(&self) {
        self.journal.borrow_mut().clear();
    }
}
