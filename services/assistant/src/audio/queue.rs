//! Bounded sample queue between a device thread and the session loop.

use parking_lot::Mutex;
use ringbuf::{HeapRb, traits::*};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe ring buffer of mono samples.
///
/// When full, pushing drops the oldest samples so the newest audio is kept.
/// Every dropped sample is counted.
#[derive(Clone)]
pub struct FrameQueue {
    buffer: Arc<Mutex<HeapRb<f32>>>,
    dropped: Arc<AtomicU64>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(HeapRb::new(capacity.max(1)))),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Capacity holding `secs` seconds of audio at `sample_rate`.
    pub fn with_duration(secs: f32, sample_rate: u32) -> Self {
        Self::new((secs * sample_rate as f32).ceil() as usize)
    }

    pub fn push(&self, samples: &[f32]) {
        let mut buffer = self.buffer.lock();
        let mut dropped = 0u64;
        for &sample in samples {
            if buffer.try_push(sample).is_err() {
                let _ = buffer.try_pop();
                let _ = buffer.try_push(sample);
                dropped += 1;
            }
        }
        if dropped > 0 {
            self.dropped.fetch_add(dropped, Ordering::Relaxed);
        }
    }

    /// Removes and returns everything queued.
    pub fn drain(&self) -> Vec<f32> {
        let mut buffer = self.buffer.lock();
        let mut samples = Vec::with_capacity(buffer.occupied_len());
        while let Some(sample) = buffer.try_pop() {
            samples.push(sample);
        }
        samples
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.lock().capacity().get()
    }

    /// Total samples dropped on overflow since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
