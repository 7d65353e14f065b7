// src/motion/servo.rs - Absolute servo positioning by pulse width
use crate::hardware::{ActuatorRole, Gpio, PinError, ServoBounds};

/// Pins lowered onto the board.
pub const SERVO_ENGAGED_US: u32 = 790;
/// Pins lifted clear of the board.
pub const SERVO_DISENGAGED_US: u32 = 500;

/// A pulse width already checked against the servo bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoCommand {
    width_us: u32,
}

impl ServoCommand {
    pub fn new(width_us: u32, bounds: ServoBounds) -> Result<Self, PinError> {
        if !bounds.contains(width_us) {
            return Err(PinError::Range {
                width_us,
                min_us: bounds.min_us,
                max_us: bounds.max_us,
            });
        }
        Ok(Self { width_us })
    }

    pub fn width_us(&self) -> u32 {
        self.width_us
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServoPositioner {
    role: ActuatorRole,
}

impl ServoPositioner {
    pub fn new() -> Self {
        Self { role: ActuatorRole::ServoPwm }
    }

    /// Move to `width_us`. Returns `false` when the line already carries that
    /// width and nothing was written.
    pub fn set_position(&self, gpio: &mut Gpio, width_us: u32) -> Result<bool, PinError> {
        let command = ServoCommand::new(width_us, gpio.registry().servo_bounds())?;
        if gpio.pulse_width(self.role) == Some(command.width_us()) {
            tracing::trace!("Servo already at {} us", width_us);
            return Ok(false);
        }
        gpio.write_pwm(self.role, command.width_us())?;
        tracing::debug!("Servo -> {} us", width_us);
        Ok(true)
    }

    pub fn clamp(&self, gpio: &Gpio, width_us: u32) -> u32 {
        gpio.registry().servo_bounds().clamp(width_us)
    }

    pub fn position(&self, gpio: &Gpio) -> Option<u32> {
        gpio.pulse_width(self.role)
    }
}

impl Default for ServoPositioner {
    fn default() -> Self {
        Self::new()
    }
}
