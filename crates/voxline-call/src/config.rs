//! Call configuration loaded from TOML and the environment.
//!
//! | Key | Env | Default | Description |
//! |-----|-----|---------|-------------|
//! | endpoint | VOXLINE_ENDPOINT | unset | `ws://` or `wss://` voice server. Unset runs the call in demo mode. |
//! | chunk_interval_ms | VOXLINE_CHUNK_INTERVAL_MS | 250 | Duration of audio carried by one `audio_chunk`. |
//! | sample_rate | VOXLINE_SAMPLE_RATE | 16000 | Requested microphone rate in Hz. |
//! | channels | VOXLINE_CHANNELS | 1 | Requested microphone channels. |
//! | echo_cancellation | VOXLINE_ECHO_CANCELLATION | true | Requested from the capture device. |
//! | noise_suppression | VOXLINE_NOISE_SUPPRESSION | true | Requested from the capture device. |
//! | on_device_denied | VOXLINE_ON_DEVICE_DENIED | continue | `continue` (playback only) or `end_call`. |

use crate::capture::CaptureParams;
use crate::error::{CallError, CallResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// What the session does when the microphone cannot be opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceDeniedPolicy {
    /// Keep the call up and keep playing assistant audio; nothing is sent.
    #[default]
    #[serde(rename = "continue")]
    ContinuePlaybackOnly,
    /// Treat a missing microphone as fatal for the call and hang up.
    EndCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallConfig {
    /// Voice server address. `None` starts the call without a connection (demo mode).
    #[serde(default)]
    pub endpoint: Option<String>,
    pub chunk_interval_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    #[serde(default)]
    pub on_device_denied: DeviceDeniedPolicy,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            chunk_interval_ms: 250,
            sample_rate: 16000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            on_device_denied: DeviceDeniedPolicy::ContinuePlaybackOnly,
        }
    }
}

fn builder_with_defaults(
) -> Result<config::ConfigBuilder<config::builder::DefaultState>, config::ConfigError> {
    let defaults = CallConfig::default();
    config::Config::builder()
        .set_default("chunk_interval_ms", defaults.chunk_interval_ms as i64)?
        .set_default("sample_rate", defaults.sample_rate as i64)?
        .set_default("channels", defaults.channels as i64)?
        .set_default("echo_cancellation", defaults.echo_cancellation)?
        .set_default("noise_suppression", defaults.noise_suppression)?
        .set_default("on_device_denied", "continue")
}

impl CallConfig {
    /// Load config from file and environment. Precedence: env `VOXLINE_*` > `VOXLINE_CONFIG` path
    /// (or `config/voxline.toml`) > defaults.
    pub fn load() -> CallResult<Self> {
        let config_path =
            std::env::var("VOXLINE_CONFIG").unwrap_or_else(|_| "config/voxline.toml".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same as [`CallConfig::load`] with an explicit file. A missing file is not an error.
    pub fn load_from(path: &Path) -> CallResult<Self> {
        let builder = builder_with_defaults()?;
        let builder = if path.exists() {
            builder.add_source(config::File::from(path))
        } else {
            builder
        };

        let built = builder
            .add_source(
                config::Environment::with_prefix("VOXLINE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = built.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document on top of the defaults (no environment).
    pub fn from_toml_str(toml: &str) -> CallResult<Self> {
        let config: Self = builder_with_defaults()?
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CallResult<()> {
        if self.chunk_interval_ms == 0 {
            return Err(CallError::Config("chunk_interval_ms must be greater than zero".into()));
        }
        if self.sample_rate == 0 {
            return Err(CallError::Config("sample_rate must be greater than zero".into()));
        }
        if self.channels == 0 {
            return Err(CallError::Config("channels must be at least 1".into()));
        }
        self.endpoint_url()?;
        Ok(())
    }

    /// The configured endpoint, parsed. Blank strings count as unset.
    pub fn endpoint_url(&self) -> CallResult<Option<Url>> {
        let raw = match self.endpoint.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s,
            _ => return Ok(None),
        };
        let url = Url::parse(raw)?;
        match url.scheme() {
            "ws" | "wss" => Ok(Some(url)),
            other => Err(CallError::Config(format!(
                "endpoint must use ws:// or wss://, got {}://",
                other
            ))),
        }
    }

    pub fn chunk_interval(&self) -> Duration {
        Duration::from_millis(self.chunk_interval_ms)
    }

    pub fn capture_params(&self) -> CaptureParams {
        CaptureParams {
            sample_rate: self.sample_rate,
            channels: self.channels,
            echo_cancellation: self.echo_cancellation,
            noise_suppression: self.noise_suppression,
            chunk_interval: self.chunk_interval(),
        }
    }
}
