//! Data side of the voice-activity visualization.
//!
//! The session reports activity and loudness through [`ActivityObserver`].
//! [`EnergyMeter`] keeps the state a renderer would draw from.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// Receives activity updates from the session and the audio paths.
pub trait ActivityObserver: Send + Sync {
    /// The user is speaking or the assistant is working on a reply.
    fn set_active(&self, active: bool);

    fn set_assistant_speaking(&self, speaking: bool);

    /// Loudness of one captured or played chunk.
    fn update_energy(&self, energy: f32);
}

const ENERGY_WINDOW: usize = 50;

struct EnergyWindow {
    samples: VecDeque<f32>,
    max_energy: f32,
}

/// Rolling loudness over the last 50 chunks with a self-adjusting ceiling.
///
/// The ceiling rises immediately with louder input. Once the window is full
/// it falls back to the loudest chunk still inside it.
pub struct EnergyMeter {
    active: AtomicBool,
    speaking: AtomicBool,
    window: Mutex<EnergyWindow>,
}

impl Default for EnergyMeter {
    fn default() -> Self {
        Self {
            active: AtomicBool::new(false),
            speaking: AtomicBool::new(false),
            window: Mutex::new(EnergyWindow {
                samples: VecDeque::with_capacity(ENERGY_WINDOW),
                max_energy: 1.0,
            }),
        }
    }
}

impl EnergyMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn is_assistant_speaking(&self) -> bool {
        self.speaking.load(Ordering::Relaxed)
    }

    /// Whether a renderer should show the highlighted state.
    pub fn is_highlighted(&self) -> bool {
        self.is_active() || self.is_assistant_speaking()
    }

    pub fn max_energy(&self) -> f32 {
        self.window.lock().max_energy
    }

    /// Mean energy of the window relative to the ceiling.
    pub fn level(&self) -> f32 {
        let window = self.window.lock();
        if window.samples.is_empty() {
            return 0.0;
        }
        let mean = window.samples.iter().sum::<f32>() / window.samples.len() as f32;
        let ceiling = if window.max_energy > 0.0 {
            window.max_energy
        } else {
            1.0
        };
        mean / ceiling
    }
}

impl ActivityObserver for EnergyMeter {
    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    fn set_assistant_speaking(&self, speaking: bool) {
        self.speaking.store(speaking, Ordering::Relaxed);
    }

    fn update_energy(&self, energy: f32) {
        let mut window = self.window.lock();
        if window.samples.len() == ENERGY_WINDOW {
            window.samples.pop_front();
        }
        window.samples.push_back(energy);

        let current_max = window.samples.iter().copied().fold(f32::MIN, f32::max);
        if current_max > window.max_energy {
            window.max_energy = current_max;
        } else if window.samples.len() == ENERGY_WINDOW {
            window.max_energy = current_max;
        }
    }
}
