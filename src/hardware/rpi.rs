// src/hardware/rpi.rs - Raspberry Pi GPIO through rppal
use std::collections::HashMap;
use std::time::Duration;

use rppal::gpio::{self, OutputPin};

use super::{BackendError, Level, PinBackend, PinId, PinMode};

/// 50 Hz servo frame.
const SERVO_PERIOD: Duration = Duration::from_millis(20);

pub struct RppalBackend {
    gpio: gpio::Gpio,
    outputs: HashMap<PinId, OutputPin>,
}

impl RppalBackend {
    pub fn new() -> Result<Self, BackendError> {
        let gpio = gpio::Gpio::new().map_err(|e| BackendError(format!("GPIO unavailable: {}", e)))?;
        tracing::info!("Opened Raspberry Pi GPIO");
        Ok(Self {
            gpio,
            outputs: HashMap::new(),
        })
    }

    fn output(&mut self, pin: PinId) -> Result<&mut OutputPin, BackendError> {
        self.outputs
            .get_mut(&pin)
            .ok_or_else(|| BackendError(format!("GPIO {} was never set up", pin)))
    }
}

impl PinBackend for RppalBackend {
    fn set_mode(&mut self, pin: PinId, mode: PinMode) -> Result<(), BackendError> {
        let mut output = self
            .gpio
            .get(pin)
            .map_err(|e| BackendError(e.to_string()))?
            .into_output();
        // Lines keep their last level on exit; the safety pass leaves them idle.
        output.set_reset_on_drop(false);
        tracing::debug!("GPIO {} claimed for {}", pin, mode);
        self.outputs.insert(pin, output);
        Ok(())
    }

    fn write(&mut self, pin: PinId, level: Level) -> Result<(), BackendError> {
        let output = self.output(pin)?;
        match level {
            Level::Low => output.set_low(),
            Level::High => output.set_high(),
        }
        Ok(())
    }

    fn set_servo_pulse_width(&mut self, pin: PinId, width_us: u32) -> Result<(), BackendError> {
        let output = self.output(pin)?;
        output
            .set_pwm(SERVO_PERIOD, Duration::from_micros(u64::from(width_us)))
            .map_err(|e| BackendError(e.to_string()))
    }

    fn release(&mut self, pin: PinId) -> Result<(), BackendError> {
        if let Some(mut output) = self.outputs.remove(&pin) {
            output.clear_pwm().map_err(|e| BackendError(e.to_string()))?;
        }
        Ok(())
    }
}
