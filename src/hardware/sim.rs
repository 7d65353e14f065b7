// src/hardware/sim.rs - In-memory pin backend for dry runs and tests
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{BackendError, Level, PinBackend, PinId, PinMode};

/// One physical action seen by the simulated driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PinEvent {
    SetMode { pin: PinId, mode: PinMode },
    Write { pin: PinId, level: Level },
    ServoPulse { pin: PinId, width_us: u32 },
    Release { pin: PinId },
}

impl PinEvent {
    pub fn pin(&self) -> PinId {
        match *self {
            PinEvent::SetMode { pin, .. }
            | PinEvent::Write { pin, .. }
            | PinEvent::ServoPulse { pin, .. }
            | PinEvent::Release { pin } => pin,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    events: Vec<PinEvent>,
    failing: HashSet<PinId>,
}

/// Records every call. Clones share the same log, so a test can keep a
/// handle while the `Gpio` owns the boxed backend.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBackend {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PinEvent> {
        self.lock().events.clone()
    }

    /// Writes only (mode changes and releases filtered out).
    pub fn writes(&self) -> Vec<PinEvent> {
        self.lock()
            .events
            .iter()
            .filter(|e| matches!(e, PinEvent::Write { .. } | PinEvent::ServoPulse { .. }))
            .cloned()
            .collect()
    }

    pub fn writes_to(&self, pin: PinId) -> Vec<PinEvent> {
        self.writes().into_iter().filter(|e| e.pin() == pin).collect()
    }

    pub fn clear(&self) {
        self.lock().events.clear();
    }

    /// Make every later write to `pin` fail.
    pub fn fail_pin(&self, pin: PinId) {
        self.lock().failing.insert(pin);
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // The log stays readable after a poisoning panic.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, event: PinEvent) -> Result<(), BackendError> {
        let mut state = self.lock();
        if state.failing.contains(&event.pin()) && !matches!(event, PinEvent::Release { .. }) {
            return Err(BackendError(format!("simulated fault on GPIO {}", event.pin())));
        }
        state.events.push(event);
        Ok(())
    }
}

impl PinBackend for SimulatedBackend {
    fn set_mode(&mut self, pin: PinId, mode: PinMode) -> Result<(), BackendError> {
        self.record(PinEvent::SetMode { pin, mode })
    }

    fn write(&mut self, pin: PinId, level: Level) -> Result<(), BackendError> {
        self.record(PinEvent::Write { pin, level })
    }

    fn set_servo_pulse_width(&mut self, pin: PinId, width_us: u32) -> Result<(), BackendError> {
        self.record(PinEvent::ServoPulse { pin, width_us })
    }

    fn release(&mut self, pin: PinId) -> Result<(), BackendError> {
        self.record(PinEvent::Release { pin })
    }
}
