//! Events delivered to the session's single queue.
//!
//! Device and network callbacks never touch session state directly. They post one of
//! these onto an unbounded channel and the session applies them in arrival order.

use crate::playback::ClipId;
use tokio::sync::mpsc;

/// Sender half of the session queue, handed to connectors and renderers.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Lifecycle and traffic reported by a transport channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is open and `send` will be accepted.
    Opened,
    /// A text frame arrived; still undecoded.
    Message(String),
    /// A binary frame arrived (not part of the protocol), with its length.
    Binary(usize),
    /// The connection is gone. 1006 stands for "closed without a close frame".
    Closed { code: u16, reason: String },
    /// Connect or I/O failure. Always followed by `Closed`.
    Failed(String),
}

/// Outcome of a clip reported by the renderer after `start` returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Finished(ClipId),
    Failed(ClipId, String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Transport(TransportEvent),
    Playback(PlaybackEvent),
}

impl From<TransportEvent> for SessionEvent {
    fn from(event: TransportEvent) -> Self {
        SessionEvent::Transport(event)
    }
}

impl From<PlaybackEvent> for SessionEvent {
    fn from(event: PlaybackEvent) -> Self {
        SessionEvent::Playback(event)
    }
}

/// Close code used when the peer vanished without a close handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Close code for an orderly shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
