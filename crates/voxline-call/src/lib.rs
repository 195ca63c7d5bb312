//! # Voxline Call - Real-time Voice Call Sessions
//!
//! This crate holds the client side of a spoken call with a remote assistant:
//! microphone audio is streamed to a voice server in fixed-length chunks, and
//! synthesized speech coming back is played as it arrives. The user's voice
//! always wins. Any captured chunk cuts assistant playback before it is sent.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Call Session                          │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐      │
//! │  │   Capture    │→ │   Barge-in   │→ │  Transport   │ ───▶ server
//! │  │ (cpal+hound) │  │    rule      │  │ (websocket)  │      │
//! │  └──────────────┘  └──────────────┘  └──────────────┘      │
//! │                           ↓ cancel          │ tts_chunk     │
//! │                    ┌──────────────┐         │               │
//! │                    │   Playback   │←────────┘               │
//! │                    │   (rodio)    │                         │
//! │                    └──────────────┘                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything runs on the caller's task. Device and network callbacks only post
//! [`SessionEvent`]s; [`CallSession`] applies them one at a time.

pub mod capture;
pub mod config;
pub mod error;
pub mod event;
pub mod interrupt;
pub mod playback;
pub mod protocol;
pub mod session;
pub mod transport;

pub use capture::{
    AudioChunk, AudioInput, CaptureFrame, CaptureParams, CapturePipeline, CpalMicrophone,
    FrameSender, InputFormat,
};
pub use config::{CallConfig, DeviceDeniedPolicy};
pub use error::{CallError, CallResult, ErrorKind};
pub use event::{EventSender, PlaybackEvent, SessionEvent, TransportEvent};
pub use interrupt::{barge_in, Interruption};
pub use playback::{
    ClipId, ClipNotifier, ClipRenderer, PlaybackManager, PlaybackState, RenderHandle,
    RodioSpeaker,
};
pub use protocol::{Inbound, TransportMessage};
pub use session::{
    CallHandle, CallSession, CallStatus, ConnectionState, RecordingState, SessionPhase,
};
pub use transport::{Connector, TransportChannel, WsChannel, WsConnector};
