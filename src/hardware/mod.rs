// src/hardware/mod.rs - Logical GPIO lines on top of a physical pin backend
pub mod registry;
pub mod sim;
#[cfg(feature = "rpi")]
pub mod rpi;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use registry::{ActuatorRegistry, ActuatorRole, PinId, RegistryError, ServoBounds};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PinError {
    #[error("Configuration error on {role}: {reason}")]
    Configuration { role: ActuatorRole, reason: String },
    #[error("Capability error: {role} is not configured as {required}")]
    Capability { role: ActuatorRole, required: PinMode },
    #[error("Range error: pulse width {width_us} us outside {min_us}..={max_us} us")]
    Range { width_us: u32, min_us: u32, max_us: u32 },
    #[error("Backend error on GPIO {pin}: {source}")]
    Backend {
        pin: PinId,
        #[source]
        source: BackendError,
    },
}

/// Failure reported by a physical driver.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct BackendError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Low,
    High,
}

impl From<bool> for Level {
    fn from(high: bool) -> Self {
        if high { Level::High } else { Level::Low }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Low => f.write_str("0"),
            Level::High => f.write_str("1"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinMode {
    DigitalOut,
    PwmOut,
}

impl fmt::Display for PinMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinMode::DigitalOut => f.write_str("digital-out"),
            PinMode::PwmOut => f.write_str("pwm-out"),
        }
    }
}

/// Last value asserted on a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinState {
    Unset,
    Level(Level),
    PulseWidth(u32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalPin {
    pub id: PinId,
    pub mode: Option<PinMode>,
    pub state: PinState,
}

/// Physical GPIO driver. Calls must complete before returning.
pub trait PinBackend: Send {
    fn set_mode(&mut self, pin: PinId, mode: PinMode) -> Result<(), BackendError>;
    fn write(&mut self, pin: PinId, level: Level) -> Result<(), BackendError>;
    fn set_servo_pulse_width(&mut self, pin: PinId, width_us: u32) -> Result<(), BackendError>;
    fn release(&mut self, pin: PinId) -> Result<(), BackendError>;
}

/// Open the backend named in the configuration.
pub fn open_backend(kind: crate::config::BackendKind) -> Result<Box<dyn PinBackend>, BackendError> {
    use crate::config::BackendKind;
    match kind {
        BackendKind::Sim => {
            tracing::info!("Using simulated GPIO backend");
            Ok(Box::new(sim::SimulatedBackend::new()))
        }
        #[cfg(feature = "rpi")]
        BackendKind::Rpi => Ok(Box::new(rpi::RppalBackend::new()?)),
        #[cfg(not(feature = "rpi"))]
        BackendKind::Rpi => Err(BackendError(
            "backend 'rpi' requires building with the 'rpi' feature".to_string(),
        )),
    }
}

/// Role-addressed GPIO access. Only this type mutates pin state.
pub struct Gpio {
    registry: Arc<ActuatorRegistry>,
    backend: Box<dyn PinBackend>,
    pins: HashMap<ActuatorRole, LogicalPin>,
    writes: u64,
}

impl Gpio {
    pub fn new(registry: Arc<ActuatorRegistry>, backend: Box<dyn PinBackend>) -> Self {
        let pins = registry
            .roles()
            .map(|(role, id)| {
                (role, LogicalPin { id, mode: None, state: PinState::Unset })
            })
            .collect();
        Self {
            registry,
            backend,
            pins,
            writes: 0,
        }
    }

    /// Configure every role of the rig: motor lines digital, servo line PWM.
    pub fn configure_rig(&mut self) -> Result<(), PinError> {
        for role in ActuatorRole::ALL {
            let mode = match role {
                ActuatorRole::ServoPwm => PinMode::PwmOut,
                _ => PinMode::DigitalOut,
            };
            self.configure(role, mode)?;
        }
        Ok(())
    }

    pub fn configure(&mut self, role: ActuatorRole, mode: PinMode) -> Result<(), PinError> {
        if self.writes > 0 {
            return Err(PinError::Configuration {
                role,
                reason: format!("cannot configure after {} writes", self.writes),
            });
        }
        let pin = self.pin_mut(role);
        match pin.mode {
            Some(current) if current == mode => return Ok(()),
            Some(current) => {
                return Err(PinError::Configuration {
                    role,
                    reason: format!("already configured as {}", current),
                });
            }
            None => {}
        }
        let id = pin.id;
        self.backend
            .set_mode(id, mode)
            .map_err(|source| PinError::Backend { pin: id, source })?;
        self.pin_mut(role).mode = Some(mode);
        tracing::debug!("GPIO {} ({}) configured as {}", id, role, mode);
        Ok(())
    }

    pub fn write_digital(&mut self, role: ActuatorRole, level: Level) -> Result<(), PinError> {
        let pin = self.pin(role);
        if pin.mode != Some(PinMode::DigitalOut) {
            return Err(PinError::Capability { role, required: PinMode::DigitalOut });
        }
        let id = pin.id;
        self.backend
            .write(id, level)
            .map_err(|source| PinError::Backend { pin: id, source })?;
        self.pin_mut(role).state = PinState::Level(level);
        self.writes += 1;
        tracing::trace!("GPIO {} ({}) <- {}", id, role, level);
        Ok(())
    }

    pub fn write_pwm(&mut self, role: ActuatorRole, width_us: u32) -> Result<(), PinError> {
        let pin = self.pin(role);
        if pin.mode != Some(PinMode::PwmOut) {
            return Err(PinError::Capability { role, required: PinMode::PwmOut });
        }
        let bounds = self.registry.servo_bounds();
        if !bounds.contains(width_us) {
            return Err(PinError::Range {
                width_us,
                min_us: bounds.min_us,
                max_us: bounds.max_us,
            });
        }
        let id = pin.id;
        self.backend
            .set_servo_pulse_width(id, width_us)
            .map_err(|source| PinError::Backend { pin: id, source })?;
        self.pin_mut(role).state = PinState::PulseWidth(width_us);
        self.writes += 1;
        tracing::trace!("GPIO {} ({}) <- {} us", id, role, width_us);
        Ok(())
    }

    pub fn level(&self, role: ActuatorRole) -> Option<Level> {
        match self.pin(role).state {
            PinState::Level(level) => Some(level),
            _ => None,
        }
    }

    pub fn pulse_width(&self, role: ActuatorRole) -> Option<u32> {
        match self.pin(role).state {
            PinState::PulseWidth(width) => Some(width),
            _ => None,
        }
    }

    pub fn state(&self, role: ActuatorRole) -> &LogicalPin {
        self.pin(role)
    }

    pub fn write_count(&self) -> u64 {
        self.writes
    }

    pub fn registry(&self) -> &ActuatorRegistry {
        &self.registry
    }

    /// Hand every line back to the driver. Errors are logged, not returned.
    pub fn release_all(&mut self) {
        for (role, id) in self.registry.roles() {
            if let Err(e) = self.backend.release(id) {
                tracing::warn!("Failed to release GPIO {} ({}): {}", id, role, e);
            }
        }
    }

    fn pin(&self, role: ActuatorRole) -> &LogicalPin {
        &self.pins[&role]
    }

    fn pin_mut(&mut self, role: ActuatorRole) -> &mut LogicalPin {
        self.pins.get_mut(&role).expect("registry maps every role")
    }
}

impl fmt::Debug for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpio")
            .field("pins", &self.pins)
            .field("writes", &self.writes)
            .finish()
    }
}
