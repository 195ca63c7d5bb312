//! Wire format spoken with the voice server.
//!
//! Every frame is a JSON text message with a string `type` field. Audio travels as
//! base64 (standard alphabet, padded) in `data`, both directions:
//!
//! ```text
//! client → server   {"type":"audio_chunk","data":"<base64>"}
//! server → client   {"type":"tts_chunk","data":"<base64>"}
//! server → client   {"type":"error","message":"..."}
//! ```

use crate::capture::AudioChunk;
use crate::error::{CallError, CallResult};
use base64::prelude::*;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransportMessage {
    /// One captured microphone segment.
    AudioChunk { data: String },
    /// One playable segment of assistant speech.
    TtsChunk {
        #[serde(default)]
        data: String,
    },
    /// Server-side failure report. Does not close the connection.
    Error {
        #[serde(default)]
        message: String,
    },
}

/// A decoded inbound frame, ready for the session to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    SynthesizedAudio(Bytes),
    ServerError(String),
    /// Well-formed but nothing to do; carries a short description for the log.
    Ignored(String),
}

pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

pub fn decode_payload(text: &str) -> CallResult<Bytes> {
    Ok(Bytes::from(BASE64_STANDARD.decode(text)?))
}

/// Wrap a captured chunk for sending.
pub fn outbound_audio(chunk: &AudioChunk) -> TransportMessage {
    TransportMessage::AudioChunk {
        data: encode_payload(chunk.data()),
    }
}

/// Decode one inbound text frame.
///
/// Broken JSON, a missing `type`, or an undecodable payload is a `ProtocolDecode`
/// error. Unknown types and empty audio are `Inbound::Ignored`.
pub fn decode_inbound(text: &str) -> CallResult<Inbound> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .ok_or_else(|| CallError::ProtocolDecode("message has no string `type` field".into()))?
        .to_string();

    match kind.as_str() {
        "tts_chunk" | "error" | "audio_chunk" => {}
        _ => {
            debug!(kind = %kind, "ignoring unknown message type");
            return Ok(Inbound::Ignored(format!("unknown type `{}`", kind)));
        }
    }

    match serde_json::from_value::<TransportMessage>(value)? {
        TransportMessage::TtsChunk { data } if data.is_empty() => {
            Ok(Inbound::Ignored("tts_chunk without data".into()))
        }
        TransportMessage::TtsChunk { data } => Ok(Inbound::SynthesizedAudio(decode_payload(&data)?)),
        TransportMessage::Error { message } => Ok(Inbound::ServerError(message)),
        TransportMessage::AudioChunk { .. } => {
            Ok(Inbound::Ignored("audio_chunk is client-to-server only".into()))
        }
    }
}
