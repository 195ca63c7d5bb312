//! Barge-in: the user's voice always wins over assistant audio.
//!
//! This is a rule, not a service. It runs before every outgoing chunk, before a
//! new clip replaces an old one, and on hang-up. The interrupted clip is
//! discarded; nothing is paused or resumed.

use crate::playback::PlaybackManager;
use tracing::{debug, info};

/// Why playback is being cut.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    /// A freshly captured chunk is about to be sent.
    UserSpeech,
    /// A newer assistant clip is taking over the slot.
    NewClip,
    /// The call is being torn down.
    CallEnding,
}

/// Cancel the active clip, if any, before the caller proceeds.
///
/// Returns true when a clip was actually cut.
pub fn barge_in(playback: &mut PlaybackManager, reason: Interruption) -> bool {
    let clip = playback.active_clip();
    if !playback.cancel() {
        return false;
    }
    match (reason, clip) {
        (Interruption::UserSpeech, Some(clip)) => {
            info!("⚡ User speech interrupted assistant audio ({})", clip)
        }
        (_, clip) => debug!(?reason, ?clip, "playback cut"),
    }
    true
}
