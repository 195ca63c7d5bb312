//! Error types for voxline calls

use thiserror::Error;

/// Result type alias for call operations
pub type CallResult<T> = Result<T, CallError>;

/// Errors that can occur while a call is being set up, carried, or torn down.
///
/// None of these are fatal to the process. Components return them, and the
/// session turns them into a `last_error` entry and/or a state transition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Microphone unavailable: {0}")]
    DeviceAccess(String),

    #[error("Microphone stream error: {0}")]
    CaptureStream(String),

    #[error("Could not connect to the voice server: {0}")]
    TransportConnect(String),

    #[error("Could not send to the voice server: {0}")]
    TransportSend(String),

    #[error("Could not close the voice server connection: {0}")]
    TransportClose(String),

    #[error("Connection to the voice server was lost: {0}")]
    TransportLost(String),

    #[error("Voice server reported an error: {0}")]
    Server(String),

    #[error("Assistant audio could not be decoded: {0}")]
    PlaybackDecode(String),

    #[error("Assistant audio could not be played: {0}")]
    PlaybackRender(String),

    #[error("Malformed message from the voice server: {0}")]
    ProtocolDecode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid call operation: {0}")]
    Usage(String),
}

/// Coarse classification of a [`CallError`], stable across message wording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    DeviceAccess,
    CaptureStream,
    TransportConnect,
    TransportSend,
    TransportClose,
    TransportLost,
    Server,
    PlaybackDecode,
    PlaybackRender,
    ProtocolDecode,
    Config,
    Usage,
}

impl CallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CallError::DeviceAccess(_) => ErrorKind::DeviceAccess,
            CallError::CaptureStream(_) => ErrorKind::CaptureStream,
            CallError::TransportConnect(_) => ErrorKind::TransportConnect,
            CallError::TransportSend(_) => ErrorKind::TransportSend,
            CallError::TransportClose(_) => ErrorKind::TransportClose,
            CallError::TransportLost(_) => ErrorKind::TransportLost,
            CallError::Server(_) => ErrorKind::Server,
            CallError::PlaybackDecode(_) => ErrorKind::PlaybackDecode,
            CallError::PlaybackRender(_) => ErrorKind::PlaybackRender,
            CallError::ProtocolDecode(_) => ErrorKind::ProtocolDecode,
            CallError::Config(_) => ErrorKind::Config,
            CallError::Usage(_) => ErrorKind::Usage,
        }
    }

    /// Failures that belong to the connection rather than a device or a message.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            CallError::TransportConnect(_)
                | CallError::TransportSend(_)
                | CallError::TransportClose(_)
                | CallError::TransportLost(_)
        )
    }

    /// Playback failures of either flavour.
    pub fn is_playback(&self) -> bool {
        matches!(self, CallError::PlaybackDecode(_) | CallError::PlaybackRender(_))
    }
}

impl From<cpal::DevicesError> for CallError {
    fn from(err: cpal::DevicesError) -> Self {
        CallError::DeviceAccess(err.to_string())
    }
}

impl From<cpal::SupportedStreamConfigsError> for CallError {
    fn from(err: cpal::SupportedStreamConfigsError) -> Self {
        CallError::DeviceAccess(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for CallError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        CallError::DeviceAccess(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for CallError {
    fn from(err: cpal::BuildStreamError) -> Self {
        CallError::DeviceAccess(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for CallError {
    fn from(err: cpal::PlayStreamError) -> Self {
        CallError::DeviceAccess(err.to_string())
    }
}

impl From<serde_json::Error> for CallError {
    fn from(err: serde_json::Error) -> Self {
        CallError::ProtocolDecode(err.to_string())
    }
}

impl From<base64::DecodeError> for CallError {
    fn from(err: base64::DecodeError) -> Self {
        CallError::ProtocolDecode(format!("payload is not valid base64: {}", err))
    }
}

impl From<config::ConfigError> for CallError {
    fn from(err: config::ConfigError) -> Self {
        CallError::Config(err.to_string())
    }
}

impl From<url::ParseError> for CallError {
    fn from(err: url::ParseError) -> Self {
        CallError::Config(format!("invalid endpoint: {}", err))
    }
}
