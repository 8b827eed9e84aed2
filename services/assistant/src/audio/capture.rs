//! Microphone capture.
//!
//! A dedicated thread owns the cpal input stream and pushes mono samples at
//! the device rate into a [`FrameQueue`]. The session loop polls the queue,
//! which resamples to the wire rate and encodes PCM16.

use super::queue::FrameQueue;
use super::{AudioError, StreamResampler, WIRE_SAMPLE_RATE, downmix, f32_to_pcm16_bytes};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, warn};

/// A source of wire-format microphone audio.
#[cfg_attr(test, mockall::automock)]
pub trait AudioSource: Send {
    /// Begins (or resumes) continuous capture.
    fn start(&mut self) -> Result<(), AudioError>;

    /// Halts capture. Safe to call repeatedly.
    fn stop(&mut self);

    /// Everything captured since the last poll as one PCM16 buffer, or
    /// `None` when nothing is available. Never blocks.
    fn poll(&mut self) -> Result<Option<Vec<u8>>, AudioError>;

    /// Releases the device. Safe to call repeatedly.
    fn close(&mut self);
}

/// Handle to the thread that owns a cpal stream.
///
/// Dropping `shutdown` wakes the thread, which then drops the stream.
pub(crate) struct DeviceThread {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DeviceThread {
    pub(crate) fn spawn<T, F>(name: &str, body: F) -> Result<(Self, T), AudioError>
    where
        T: Send + 'static,
        F: FnOnce(Sender<Result<T, AudioError>>, Receiver<()>) + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(ready_tx, shutdown_rx))
            .map_err(|e| AudioError::Device(e.to_string()))?;

        let mut thread = Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        };
        match ready_rx.recv() {
            Ok(Ok(value)) => Ok((thread, value)),
            Ok(Err(e)) => {
                thread.join();
                Err(e)
            }
            Err(_) => {
                thread.join();
                Err(AudioError::ThreadGone)
            }
        }
    }

    pub(crate) fn join(&mut self) {
        self.shutdown.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio device thread panicked.");
            }
        }
    }
}

impl Drop for DeviceThread {
    fn drop(&mut self) {
        self.join();
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    queue: FrameQueue,
    capturing: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let stream = device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if !capturing.load(Ordering::Relaxed) {
                return;
            }
            let samples: Vec<f32> = data.iter().map(|s| s.to_sample::<f32>()).collect();
            queue.push(&downmix(&samples, channels));
        },
        |err| error!("Audio input stream error: {}", err),
        None,
    )?;
    Ok(stream)
}

fn open_input(
    queue_secs: f32,
    capturing: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32, FrameQueue), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoDevice("input"))?;
    info!(
        "Using input device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    let supported = device.default_input_config()?;
    let config: cpal::StreamConfig = supported.config();
    let rate = config.sample_rate.0;
    let queue = FrameQueue::with_duration(queue_secs, rate);

    let stream = match supported.sample_format() {
        SampleFormat::F32 => build_input_stream::<f32>(&device, &config, queue.clone(), capturing)?,
        SampleFormat::I16 => build_input_stream::<i16>(&device, &config, queue.clone(), capturing)?,
        SampleFormat::U16 => build_input_stream::<u16>(&device, &config, queue.clone(), capturing)?,
        other => {
            return Err(AudioError::Device(format!(
                "unsupported input sample format {other:?}"
            )));
        }
    };
    stream.play()?;
    Ok((stream, rate, queue))
}

/// Runs on the device thread: opens the default input and parks until shutdown.
fn run_input(
    queue_secs: f32,
    capturing: Arc<AtomicBool>,
    ready: Sender<Result<(u32, FrameQueue), AudioError>>,
    shutdown: Receiver<()>,
) {
    match open_input(queue_secs, capturing) {
        Ok((stream, rate, queue)) => {
            if ready.send(Ok((rate, queue))).is_ok() {
                // Blocks until the handle is dropped.
                let _ = shutdown.recv();
            }
            drop(stream);
            debug!("Input stream released.");
        }
        Err(e) => {
            let _ = ready.send(Err(e));
        }
    }
}

/// Capture from the default input device.
pub struct MicrophoneCapture {
    queue: FrameQueue,
    resampler: StreamResampler,
    capturing: Arc<AtomicBool>,
    device: Option<DeviceThread>,
    reported_drops: u64,
}

impl MicrophoneCapture {
    /// Opens the default input device with a queue bounded to `queue_secs`
    /// of device audio. Capture stays paused until [`AudioSource::start`].
    pub fn open(queue_secs: f32) -> Result<Self, AudioError> {
        let capturing = Arc::new(AtomicBool::new(false));
        let flag = capturing.clone();
        let (device, (rate, queue)) = DeviceThread::spawn("audio-capture", move |ready, shutdown| {
            run_input(queue_secs, flag, ready, shutdown)
        })?;
        let queue_capacity = queue.capacity();
        let mut capture = Self::from_queue(queue, rate)?;
        info!(
            device_rate = rate,
            resampling = !capture.resampler.is_passthrough(),
            queue_capacity,
            "Microphone opened."
        );
        capture.capturing = capturing;
        capture.device = Some(device);
        Ok(capture)
    }

    /// Capture over an existing queue filled by some other producer.
    pub fn from_queue(queue: FrameQueue, device_rate: u32) -> Result<Self, AudioError> {
        Ok(Self {
            queue,
            resampler: StreamResampler::new(device_rate, WIRE_SAMPLE_RATE)?,
            capturing: Arc::new(AtomicBool::new(false)),
            device: None,
            reported_drops: 0,
        })
    }

    fn report_drops(&mut self) {
        let dropped = self.queue.dropped();
        if dropped > self.reported_drops {
            warn!(
                dropped = dropped - self.reported_drops,
                total = dropped,
                "Capture queue overflowed, oldest audio dropped."
            );
            self.reported_drops = dropped;
        }
    }
}

impl AudioSource for MicrophoneCapture {
    fn start(&mut self) -> Result<(), AudioError> {
        if !self.capturing.swap(true, Ordering::Relaxed) {
            debug!("Microphone capture started.");
        }
        Ok(())
    }

    fn stop(&mut self) {
        if self.capturing.swap(false, Ordering::Relaxed) {
            debug!("Microphone capture stopped.");
        }
    }

    fn poll(&mut self) -> Result<Option<Vec<u8>>, AudioError> {
        self.report_drops();
        let samples = self.queue.drain();
        if samples.is_empty() {
            return Ok(None);
        }
        let resampled = self.resampler.process(&samples)?;
        if resampled.is_empty() {
            return Ok(None);
        }
        Ok(Some(f32_to_pcm16_bytes(&resampled)))
    }

    fn close(&mut self) {
        self.stop();
        if let Some(mut device) = self.device.take() {
            device.join();
            info!("Microphone closed.");
        }
        self.queue.clear();
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.close();
    }
}
