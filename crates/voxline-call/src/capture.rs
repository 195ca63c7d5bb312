//! Microphone capture using CPAL, cut into fixed-duration chunks.
//!
//! The device pushes raw frames from its own callback thread; the pipeline
//! accumulates them and hands out one [`AudioChunk`] per `chunk_interval`. Each
//! chunk is a self-contained 16-bit PCM WAV so the server can decode it alone.

use crate::error::{CallError, CallResult};
use bytes::Bytes;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    FromSample, Sample, SampleFormat, SizedSample, SupportedStreamConfig,
    SupportedStreamConfigRange,
};
use std::io::Cursor;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Requested microphone setup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureParams {
    /// Sample rate in Hz (default: 16000)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Ask the device for acoustic echo cancellation
    pub echo_cancellation: bool,

    /// Ask the device for noise suppression
    pub noise_suppression: bool,

    /// Audio duration per chunk (default: 250ms)
    pub chunk_interval: Duration,
}

impl Default for CaptureParams {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            echo_cancellation: true,
            noise_suppression: true,
            chunk_interval: Duration::from_millis(250),
        }
    }
}

impl CaptureParams {
    /// Interleaved samples that make up one chunk.
    pub fn samples_per_chunk(&self) -> usize {
        let frames = self.sample_rate as u128 * self.chunk_interval.as_millis() / 1000;
        (frames as usize).max(1) * self.channels.max(1) as usize
    }
}

/// One encoded microphone segment. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    sequence: u64,
    data: Bytes,
}

impl AudioChunk {
    pub fn new(sequence: u64, data: Bytes) -> Self {
        Self { sequence, data }
    }

    /// Position in capture order, starting at 0.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// What a device reports from its callback thread.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureFrame {
    /// Interleaved 16-bit samples, in capture order.
    Samples(Vec<i16>),
    /// The device stream reported an error; capture may continue.
    Fault(String),
}

pub type FrameSender = mpsc::UnboundedSender<CaptureFrame>;

/// Rate and channel layout of the frames a device pushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl From<&CaptureParams> for InputFormat {
    fn from(params: &CaptureParams) -> Self {
        Self {
            sample_rate: params.sample_rate,
            channels: params.channels,
        }
    }
}

/// A microphone the pipeline can own.
pub trait AudioInput {
    /// Acquire the device and start pushing frames into `frames`.
    ///
    /// Returns the format the device actually delivers, which may differ from
    /// `params` when the hardware cannot do the requested rate or channel count.
    /// Errors mean access was denied or no device is available.
    fn open(&mut self, params: &CaptureParams, frames: FrameSender) -> CallResult<InputFormat>;

    /// Stop the device stream and let go of it. Safe to call when not open.
    fn release(&mut self);
}

/// Default system microphone through CPAL.
#[derive(Default)]
pub struct CpalMicrophone {
    stream: Option<cpal::Stream>,
}

impl CpalMicrophone {
    pub fn new() -> Self {
        Self::default()
    }

    /// List available input devices
    pub fn list_input_devices() -> CallResult<Vec<String>> {
        let host = cpal::default_host();
        let devices = host.input_devices()?;

        let mut device_names = Vec::new();
        for device in devices {
            if let Ok(name) = device.name() {
                device_names.push(name);
            }
        }

        Ok(device_names)
    }
}

impl AudioInput for CpalMicrophone {
    fn open(&mut self, params: &CaptureParams, frames: FrameSender) -> CallResult<InputFormat> {
        if self.stream.is_some() {
            return Err(CallError::Usage("microphone is already open".into()));
        }

        info!(
            "🎤 Opening microphone ({}Hz, {} channel(s))",
            params.sample_rate, params.channels
        );

        let device = cpal::default_host()
            .default_input_device()
            .ok_or_else(|| CallError::DeviceAccess("No input device available".to_string()))?;

        info!(
            "📱 Using input device: {}",
            device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        if params.echo_cancellation || params.noise_suppression {
            // CPAL hands out raw device audio; any processing is up to the OS input chain.
            debug!(
                echo_cancellation = params.echo_cancellation,
                noise_suppression = params.noise_suppression,
                "input processing requested; relying on the host audio stack"
            );
        }

        let supported: Vec<SupportedStreamConfigRange> = device.supported_input_configs()?.collect();
        let default_config = device.default_input_config()?;
        let chosen = choose_input_config(&supported, default_config, params.into());
        info!("🔧 Input config: {:?}", chosen);

        let stream_config = chosen.config();
        let stream = match chosen.sample_format() {
            SampleFormat::F32 => build_input::<f32>(&device, &stream_config, frames)?,
            SampleFormat::I16 => build_input::<i16>(&device, &stream_config, frames)?,
            SampleFormat::U16 => build_input::<u16>(&device, &stream_config, frames)?,
            other => {
                return Err(CallError::DeviceAccess(format!(
                    "unsupported input sample format {:?}",
                    other
                )))
            }
        };

        stream.play()?;
        self.stream = Some(stream);

        info!("✅ Microphone capture started");
        Ok(InputFormat {
            sample_rate: stream_config.sample_rate.0,
            channels: stream_config.channels,
        })
    }

    fn release(&mut self) {
        if self.stream.take().is_some() {
            info!("⏹️ Microphone released");
        }
    }
}

fn is_convertible(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
}

/// Pick the device config closest to `wanted`.
///
/// An exact rate and channel match wins (f32 preferred, then i16, then u16).
/// Otherwise the device default is used and the chunks carry its format.
fn choose_input_config(
    supported: &[SupportedStreamConfigRange],
    default_config: SupportedStreamConfig,
    wanted: InputFormat,
) -> SupportedStreamConfig {
    let rate = cpal::SampleRate(wanted.sample_rate);
    let exact = [SampleFormat::F32, SampleFormat::I16, SampleFormat::U16]
        .iter()
        .find_map(|format| {
            supported.iter().find(|range| {
                range.sample_format() == *format
                    && range.channels() == wanted.channels
                    && range.min_sample_rate() <= rate
                    && rate <= range.max_sample_rate()
            })
        });

    match exact {
        Some(range) => range.clone().with_sample_rate(rate),
        None => {
            if is_convertible(default_config.sample_format()) {
                debug!(
                    wanted_rate = wanted.sample_rate,
                    wanted_channels = wanted.channels,
                    "requested input format not offered; using device default"
                );
                return default_config;
            }
            // Default is in a format we cannot convert; take any convertible range at its top rate.
            supported
                .iter()
                .find(|range| is_convertible(range.sample_format()))
                .map(|range| range.clone().with_max_sample_rate())
                .unwrap_or(default_config)
        }
    }
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames: FrameSender,
) -> CallResult<cpal::Stream>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let fault_tx = frames.clone();
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let samples = data.iter().map(|&s| i16::from_sample(s)).collect();
            // Receiver gone means the pipeline stopped; the stream is about to be dropped.
            let _ = frames.send(CaptureFrame::Samples(samples));
        },
        move |err| {
            warn!("Audio stream error: {}", err);
            let _ = fault_tx.send(CaptureFrame::Fault(err.to_string()));
        },
        None,
    )?;
    Ok(stream)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineState {
    Idle,
    Running,
    Stopped,
}

/// Turns device frames into a one-shot, strictly ordered chunk sequence.
///
/// `Idle → Running → Stopped`. Once stopped (or after a failed start) the
/// pipeline never produces chunks again.
pub struct CapturePipeline {
    device: Box<dyn AudioInput>,
    state: PipelineState,
    params: CaptureParams,
    frames: Option<mpsc::UnboundedReceiver<CaptureFrame>>,
    pending: Vec<i16>,
    next_sequence: u64,
}

impl CapturePipeline {
    pub fn new(device: Box<dyn AudioInput>) -> Self {
        Self {
            device,
            state: PipelineState::Idle,
            params: CaptureParams::default(),
            frames: None,
            pending: Vec::new(),
            next_sequence: 0,
        }
    }

    /// Request the microphone and begin capturing.
    pub fn start(&mut self, params: &CaptureParams) -> CallResult<()> {
        match self.state {
            PipelineState::Idle => {}
            PipelineState::Running => {
                return Err(CallError::Usage("capture is already running".into()))
            }
            PipelineState::Stopped => {
                return Err(CallError::Usage("capture cannot be restarted".into()))
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let format = match self.device.open(params, tx) {
            Ok(format) => format,
            Err(e) => {
                self.device.release();
                self.state = PipelineState::Stopped;
                return Err(match e {
                    CallError::DeviceAccess(_) => e,
                    other => CallError::DeviceAccess(other.to_string()),
                });
            }
        };

        if format != InputFormat::from(params) {
            info!(
                "🔧 Microphone runs at {}Hz, {} channel(s); chunks use the device format",
                format.sample_rate, format.channels
            );
        }
        // Chunk length and WAV header follow what the device delivers.
        self.params = CaptureParams {
            sample_rate: format.sample_rate,
            channels: format.channels,
            ..params.clone()
        };
        self.pending = Vec::with_capacity(self.params.samples_per_chunk());
        self.frames = Some(rx);
        self.state = PipelineState::Running;
        debug!(
            samples_per_chunk = self.params.samples_per_chunk(),
            interval_ms = self.params.chunk_interval.as_millis() as u64,
            "capture pipeline running"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state == PipelineState::Running
    }

    /// Format of the chunks being produced, once started.
    pub fn format(&self) -> InputFormat {
        InputFormat::from(&self.params)
    }

    /// Wait for the next full chunk.
    ///
    /// `None` once the pipeline is stopped or the device went away. Cancel safe:
    /// frames received before cancellation stay buffered for the next call.
    pub async fn next_chunk(&mut self) -> Option<CallResult<AudioChunk>> {
        loop {
            let wanted = self.params.samples_per_chunk();
            if self.state == PipelineState::Running && self.pending.len() >= wanted {
                let samples: Vec<i16> = self.pending.drain(..wanted).collect();
                return Some(self.encode(&samples));
            }

            let frames = self.frames.as_mut()?;
            match frames.recv().await {
                Some(CaptureFrame::Samples(samples)) => self.pending.extend_from_slice(&samples),
                Some(CaptureFrame::Fault(detail)) => {
                    return Some(Err(CallError::CaptureStream(detail)))
                }
                None => {
                    warn!("microphone stream ended unexpectedly");
                    self.stop();
                    return None;
                }
            }
        }
    }

    /// Release the device and end the sequence. Returns true if a running device was released.
    pub fn stop(&mut self) -> bool {
        let was_running = self.state == PipelineState::Running;
        if was_running {
            self.device.release();
        }
        self.frames = None;
        self.pending.clear();
        self.state = PipelineState::Stopped;
        was_running
    }

    fn encode(&mut self, samples: &[i16]) -> CallResult<AudioChunk> {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let data = encode_wav(samples, &self.params)?;
        Ok(AudioChunk::new(sequence, data))
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

fn encode_wav(samples: &[i16], params: &CaptureParams) -> CallResult<Bytes> {
    let spec = hound::WavSpec {
        channels: params.channels,
        sample_rate: params.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec)
            .map_err(|e| CallError::CaptureStream(format!("WAV encode failed: {}", e)))?;
        for &sample in samples {
            writer
                .write_sample(sample)
                .map_err(|e| CallError::CaptureStream(format!("WAV encode failed: {}", e)))?;
        }
        writer
            .finalize()
            .map_err(|e| CallError::CaptureStream(format!("WAV encode failed: {}", e)))?;
    }
    Ok(Bytes::from(cursor.into_inner()))
}
