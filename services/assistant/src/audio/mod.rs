//! Audio plumbing: the wire format, device capture and playback.
//!
//! Everything exchanged with the realtime endpoint is PCM16 little-endian
//! mono at 24 kHz. Devices run at whatever rate they support; the capture and
//! playback paths resample in between.

pub mod capture;
pub mod playback;
pub mod queue;

use base64::Engine;
use cpal::traits::{DeviceTrait, HostTrait};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::time::Duration;

pub const WIRE_SAMPLE_RATE: u32 = 24_000;
pub const WIRE_CHANNELS: u16 = 1;
pub const BYTES_PER_SAMPLE: usize = 2;

/// Errors raised by the audio devices.
#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("no {0} device available")]
    NoDevice(&'static str),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("failed to build audio stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),
    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
    #[error("failed to query device configuration: {0}")]
    DeviceConfig(#[from] cpal::DefaultStreamConfigError),
    #[error("failed to enumerate audio devices: {0}")]
    Devices(#[from] cpal::DevicesError),
    #[error("resampler error: {0}")]
    Resampler(String),
    #[error("audio device thread exited unexpectedly")]
    ThreadGone,
}

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, AudioError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )
    .map_err(|e| AudioError::Resampler(e.to_string()))
}

/// Resamples an unbounded mono stream in fixed-size chunks.
///
/// Input that does not fill a chunk is held until the next call. Equal rates
/// pass samples through untouched.
pub struct StreamResampler {
    inner: Option<FastFixedIn<f32>>,
    pending: Vec<f32>,
}

impl StreamResampler {
    const CHUNK: usize = 480;

    pub fn new(in_rate: u32, out_rate: u32) -> Result<Self, AudioError> {
        let inner = if in_rate == out_rate {
            None
        } else {
            Some(create_resampler(in_rate as f64, out_rate as f64, Self::CHUNK)?)
        };
        Ok(Self {
            inner,
            pending: Vec::new(),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.inner.is_none()
    }

    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioError> {
        let Some(resampler) = self.inner.as_mut() else {
            return Ok(input.to_vec());
        };
        self.pending.extend_from_slice(input);
        let mut out = Vec::new();
        let mut offset = 0;
        while self.pending.len() - offset >= Self::CHUNK {
            let chunk = &self.pending[offset..offset + Self::CHUNK];
            let mut frames = resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resampler(e.to_string()))?;
            if let Some(channel) = frames.pop() {
                out.extend(channel);
            }
            offset += Self::CHUNK;
        }
        self.pending.drain(..offset);
        Ok(out)
    }
}

/// Downmixes interleaved frames to mono by averaging channels.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Converts normalized samples to PCM16 little-endian bytes.
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&sample| {
            let v = (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            v.to_le_bytes()
        })
        .collect()
}

/// Converts PCM16 little-endian bytes to normalized samples. A trailing odd
/// byte is ignored.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]) as f32 / 32768.0)
        .collect()
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(fragment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(fragment)
}

/// Mean absolute amplitude of a PCM16 chunk, in sample units.
pub fn pcm16_energy(bytes: &[u8]) -> f32 {
    let samples = bytes.len() / BYTES_PER_SAMPLE;
    if samples == 0 {
        return 0.0;
    }
    let total: u64 = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]).unsigned_abs() as u64)
        .sum();
    total as f32 / samples as f32
}

/// Zeroed PCM16 wire audio lasting `duration`.
pub fn silence(duration: Duration) -> Vec<u8> {
    let samples = (WIRE_SAMPLE_RATE as f64 * duration.as_secs_f64()).floor() as usize;
    vec![0u8; samples * WIRE_CHANNELS as usize * BYTES_PER_SAMPLE]
}

/// An audio device as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub kind: &'static str,
    pub name: String,
    pub is_default: bool,
}

/// Input and output devices of the default host.
pub fn list_devices() -> Result<Vec<DeviceInfo>, AudioError> {
    let host = cpal::default_host();
    let name_of = |device: &cpal::Device| device.name().unwrap_or_else(|_| "Unknown".to_string());
    let default_input = host.default_input_device().map(|d| name_of(&d));
    let default_output = host.default_output_device().map(|d| name_of(&d));

    let mut devices = Vec::new();
    for device in host.input_devices()? {
        let name = name_of(&device);
        devices.push(DeviceInfo {
            kind: "input",
            is_default: default_input.as_deref() == Some(name.as_str()),
            name,
        });
    }
    for device in host.output_devices()? {
        let name = name_of(&device);
        devices.push(DeviceInfo {
            kind: "output",
            is_default: default_output.as_deref() == Some(name.as_str()),
            name,
        });
    }
    Ok(devices)
}
