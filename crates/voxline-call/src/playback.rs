//! Assistant speech playback with a single "now playing" slot.
//!
//! The manager owns at most one [`PlaybackClip`]. Starting a clip cuts whatever was
//! playing, and `cancel()` is the kill-switch used for barge-in and hang-up.

use crate::error::{CallError, CallResult};
use crate::event::{EventSender, PlaybackEvent};
use crate::interrupt::{self, Interruption};
use bytes::Bytes;
use rodio::{OutputStream, OutputStreamHandle, Sink, Source};
use std::fmt;
use std::io::Cursor;
use tracing::{debug, info, warn};

/// Identifies one clip for the lifetime of a manager. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipId(u64);

impl ClipId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "clip#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Silent,
    Playing,
}

/// Lets a renderer report how a clip ended, from any thread.
#[derive(Debug, Clone)]
pub struct ClipNotifier {
    clip: ClipId,
    events: EventSender,
}

impl ClipNotifier {
    pub fn new(clip: ClipId, events: EventSender) -> Self {
        Self { clip, events }
    }

    pub fn clip(&self) -> ClipId {
        self.clip
    }

    /// The clip played to its end.
    pub fn finished(&self) {
        let _ = self.events.send(PlaybackEvent::Finished(self.clip).into());
    }

    /// Rendering broke after the clip had started.
    ///
    /// For renderers whose output can fail mid-clip. [`RodioSpeaker`] never calls
    /// this: rodio reports no error once a sink is playing, so its failures all
    /// surface from [`ClipRenderer::start`].
    pub fn failed(&self, detail: impl Into<String>) {
        let _ = self
            .events
            .send(PlaybackEvent::Failed(self.clip, detail.into()).into());
    }
}

/// A clip that is currently rendering.
pub trait RenderHandle {
    /// Silence the clip immediately and free its output resources.
    fn stop(&mut self);
}

/// An output device that can render one decoded clip at a time.
pub trait ClipRenderer {
    /// Decode `audio` and start rendering it.
    ///
    /// Decode problems are `PlaybackDecode`, device problems `PlaybackRender`.
    fn start(
        &mut self,
        clip: ClipId,
        audio: Bytes,
        notifier: ClipNotifier,
    ) -> CallResult<Box<dyn RenderHandle>>;
}

/// The active clip and its rendering handle.
pub struct PlaybackClip {
    id: ClipId,
    handle: Box<dyn RenderHandle>,
}

pub struct PlaybackManager {
    renderer: Box<dyn ClipRenderer>,
    events: EventSender,
    active: Option<PlaybackClip>,
    next_id: u64,
}

impl PlaybackManager {
    pub fn new(renderer: Box<dyn ClipRenderer>, events: EventSender) -> Self {
        Self {
            renderer,
            events,
            active: None,
            next_id: 0,
        }
    }

    /// Replace whatever is playing with `audio`.
    pub fn play(&mut self, audio: Bytes) -> CallResult<ClipId> {
        interrupt::barge_in(self, Interruption::NewClip);

        let id = ClipId(self.next_id);
        self.next_id += 1;

        let notifier = ClipNotifier::new(id, self.events.clone());
        let handle = self.renderer.start(id, audio, notifier).map_err(|e| {
            warn!("{} failed to start: {}", id, e);
            e
        })?;

        info!("🔊 Playing assistant audio ({})", id);
        self.active = Some(PlaybackClip { id, handle });
        Ok(id)
    }

    /// Stop the active clip, if any. Returns true when something was cut.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(mut clip) => {
                clip.handle.stop();
                debug!("{} cancelled", clip.id);
                true
            }
            None => false,
        }
    }

    /// Natural end reported by the renderer. Stale ids are ignored.
    pub fn on_finished(&mut self, id: ClipId) -> bool {
        if self.active_clip() != Some(id) {
            debug!("ignoring completion of inactive {}", id);
            return false;
        }
        self.active = None;
        debug!("{} finished", id);
        true
    }

    /// Failure reported by the renderer mid-clip. Returns the error to surface, if the clip was active.
    pub fn on_failed(&mut self, id: ClipId, detail: String) -> Option<CallError> {
        if self.active_clip() != Some(id) {
            debug!("ignoring failure of inactive {}: {}", id, detail);
            return None;
        }
        self.cancel();
        Some(CallError::PlaybackRender(detail))
    }

    pub fn state(&self) -> PlaybackState {
        if self.active.is_some() {
            PlaybackState::Playing
        } else {
            PlaybackState::Silent
        }
    }

    pub fn active_clip(&self) -> Option<ClipId> {
        self.active.as_ref().map(|clip| clip.id)
    }
}

/// Default output device through Rodio. Each clip gets its own sink so cancelling
/// one never touches the next.
///
/// Only natural completion is reported asynchronously; decode and sink errors are
/// returned from `start`.
pub struct RodioSpeaker {
    _stream: OutputStream,
    stream_handle: OutputStreamHandle,
}

impl RodioSpeaker {
    pub fn new() -> CallResult<Self> {
        let (stream, stream_handle) =
            OutputStream::try_default().map_err(|e| CallError::PlaybackRender(e.to_string()))?;
        info!("🔊 Audio output ready");
        Ok(Self {
            _stream: stream,
            stream_handle,
        })
    }
}

struct RodioClip {
    sink: Sink,
}

impl RenderHandle for RodioClip {
    fn stop(&mut self) {
        self.sink.stop();
    }
}

impl ClipRenderer for RodioSpeaker {
    fn start(
        &mut self,
        _clip: ClipId,
        audio: Bytes,
        notifier: ClipNotifier,
    ) -> CallResult<Box<dyn RenderHandle>> {
        let source = rodio::Decoder::new(Cursor::new(audio))
            .map_err(|e| CallError::PlaybackDecode(e.to_string()))?;
        let sink = Sink::try_new(&self.stream_handle)
            .map_err(|e| CallError::PlaybackRender(e.to_string()))?;

        sink.append(source.convert_samples::<f32>());
        // Runs only if the queue drains on its own; `stop()` clears it first.
        sink.append(rodio::source::EmptyCallback::<f32>::new(Box::new(move || {
            notifier.finished()
        })));

        Ok(Box::new(RodioClip { sink }))
    }
}
