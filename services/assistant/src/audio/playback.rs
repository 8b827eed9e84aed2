//! Speaker output for streamed response audio.
//!
//! [`AudioPlayback`] opens an [`OutputDevice`] on the first chunk of a
//! response, writes chunks in arrival order, and on [`AudioPlayback::finish`]
//! pads with silence, lets the device drain, and releases it.

use super::capture::DeviceThread;
use super::{
    AudioError, StreamResampler, WIRE_SAMPLE_RATE, pcm16_bytes_to_f32, pcm16_energy, silence,
};
use crate::observer::ActivityObserver;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Silence appended after the last chunk of a response.
pub const TRAILING_SILENCE: Duration = Duration::from_millis(200);
/// Minimum wait after the trailing silence before the device is released.
pub const MIN_DRAIN_WAIT: Duration = Duration::from_millis(500);

/// An opened output stream accepting wire-format PCM16.
pub trait OutputDevice: Send {
    /// Queues audio for playback without blocking on the device.
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError>;

    /// Audio queued but not yet played.
    fn buffered(&self) -> Duration;

    /// Stops the stream and releases the device.
    fn close(&mut self);
}

/// Opens output devices on demand.
pub trait OutputOpener: Send + Sync {
    fn open(&self) -> Result<Box<dyn OutputDevice>, AudioError>;
}

pub struct AudioPlayback {
    opener: Arc<dyn OutputOpener>,
    observer: Arc<dyn ActivityObserver>,
    device: Option<Box<dyn OutputDevice>>,
    closed: bool,
}

impl AudioPlayback {
    pub fn new(opener: Arc<dyn OutputOpener>, observer: Arc<dyn ActivityObserver>) -> Self {
        Self {
            opener,
            observer,
            device: None,
            closed: false,
        }
    }

    /// Plays one decoded chunk, opening the device first if needed.
    ///
    /// The open runs on the blocking pool since it waits for the device
    /// thread to come up.
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), AudioError> {
        if self.closed {
            warn!(bytes = chunk.len(), "Playback closed, dropping audio chunk.");
            return Ok(());
        }
        if self.device.is_none() {
            let opener = self.opener.clone();
            let device = tokio::task::spawn_blocking(move || opener.open())
                .await
                .unwrap_or(Err(AudioError::ThreadGone))?;
            self.device = Some(device);
            self.observer.set_assistant_speaking(true);
        }
        if let Some(device) = self.device.as_mut() {
            device.write(chunk)?;
            self.observer.update_energy(pcm16_energy(chunk));
        }
        Ok(())
    }

    /// Ends the current response: trailing silence, drain, release.
    ///
    /// Does nothing when no audio was written since the last finish.
    pub async fn finish(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };
        if let Err(e) = device.write(&silence(TRAILING_SILENCE)) {
            warn!(error = %e, "Failed to queue trailing silence.");
        }
        let wait = device.buffered().max(MIN_DRAIN_WAIT);
        tokio::time::sleep(wait).await;
        device.close();
        self.observer.set_assistant_speaking(false);
        debug!("Audio playback completed.");
    }

    /// Releases the device immediately. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
            self.observer.set_assistant_speaking(false);
        }
        self.closed = true;
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: Arc<Mutex<VecDeque<f32>>>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let stream = device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let mut queue = queue.lock();
            for frame in data.chunks_mut(channels) {
                let sample = queue.pop_front().unwrap_or(0.0).to_sample::<T>();
                frame.fill(sample);
            }
        },
        |err| error!("Audio output stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

fn open_output(queue: Arc<Mutex<VecDeque<f32>>>) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoDevice("output"))?;
    info!(
        "Using output device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    let supported = device.default_output_config()?;
    let config: cpal::StreamConfig = supported.config();
    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_output_stream::<f32>(&device, &config, queue)?,
        SampleFormat::I16 => build_output_stream::<i16>(&device, &config, queue)?,
        SampleFormat::U16 => build_output_stream::<u16>(&device, &config, queue)?,
        other => {
            return Err(AudioError::Device(format!(
                "unsupported output sample format {other:?}"
            )));
        }
    };
    stream.play()?;
    Ok((stream, config.sample_rate.0))
}

fn run_output(
    queue: Arc<Mutex<VecDeque<f32>>>,
    ready: Sender<Result<u32, AudioError>>,
    shutdown: Receiver<()>,
) {
    match open_output(queue) {
        Ok((stream, rate)) => {
            if ready.send(Ok(rate)).is_ok() {
                let _ = shutdown.recv();
            }
            drop(stream);
            debug!("Output stream released.");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

/// The default output device, driven from its own thread.
pub struct SpeakerOutput {
    queue: Arc<Mutex<VecDeque<f32>>>,
    resampler: StreamResampler,
    device_rate: u32,
    thread: Option<DeviceThread>,
}

impl SpeakerOutput {
    pub fn open() -> Result<Self, AudioError> {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let shared = queue.clone();
        let (thread, device_rate) = DeviceThread::spawn("audio-playback", move |ready, shutdown| {
            run_output(shared, ready, shutdown)
        })?;
        Ok(Self {
            queue,
            resampler: StreamResampler::new(WIRE_SAMPLE_RATE, device_rate)?,
            device_rate,
            thread: Some(thread),
        })
    }
}

impl OutputDevice for SpeakerOutput {
    fn write(&mut self, pcm: &[u8]) -> Result<(), AudioError> {
        let samples = self.resampler.process(&pcm16_bytes_to_f32(pcm))?;
        self.queue.lock().extend(samples);
        Ok(())
    }

    fn buffered(&self) -> Duration {
        let queued = self.queue.lock().len() as u64;
        Duration::from_micros(queued * 1_000_000 / self.device_rate.max(1) as u64)
    }

    fn close(&mut self) {
        if let Some(mut thread) = self.thread.take() {
            thread.join();
            self.queue.lock().clear();
        }
    }
}

impl Drop for SpeakerOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Opens [`SpeakerOutput`] on the default device.
pub struct SpeakerOpener;

impl OutputOpener for SpeakerOpener {
    fn open(&self) -> Result<Box<dyn OutputDevice>, AudioError> {
        Ok(Box::new(SpeakerOutput::open()?))
    }
}
