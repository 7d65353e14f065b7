// src/motion/stepper.rs - Constant-rate pulse trains with an enable bracket
use crate::hardware::{Gpio, Level, PinError};
use crate::scheduler::{self, CancelToken, Clock};

use super::{Motor, MotorHandle, MotionError, StepRequest};

/// The drivers' ENABLE input is active-low.
pub const DRIVER_ENABLED: Level = Level::Low;
pub const DRIVER_DISABLED: Level = Level::High;

/// Keeps a motor driver energized for its lifetime.
///
/// `release` disables the driver and reports write errors. Dropping an
/// un-released guard (error, interruption, unwinding) runs [`force_disable`].
pub struct EnableGuard<'g> {
    gpio: &'g mut Gpio,
    handle: MotorHandle,
    armed: bool,
}

impl<'g> EnableGuard<'g> {
    pub fn engage(gpio: &'g mut Gpio, handle: MotorHandle) -> Result<Self, PinError> {
        gpio.write_digital(handle.enable, DRIVER_ENABLED)?;
        Ok(Self { gpio, handle, armed: true })
    }

    pub fn gpio(&mut self) -> &mut Gpio {
        &mut *self.gpio
    }

    pub fn release(mut self) -> Result<(), PinError> {
        self.armed = false;
        self.gpio.write_digital(self.handle.enable, DRIVER_DISABLED)
    }

    /// Leave the driver energized for a chained run on the same motor.
    pub fn hold(mut self) {
        self.armed = false;
        tracing::debug!("{} left enabled for chained run", self.handle.motor);
    }
}

impl Drop for EnableGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            tracing::warn!("{} run ended abnormally, disabling driver", self.handle.motor);
            force_disable(&mut *self.gpio, &self.handle);
        }
    }
}

/// Drive STEP low, then ENABLE inactive. STEP is written while the driver
/// is still enabled. A failed ENABLE write cannot be recovered from, so the
/// process is halted.
pub fn force_disable(gpio: &mut Gpio, handle: &MotorHandle) {
    if let Err(e) = gpio.write_digital(handle.step, Level::Low) {
        tracing::warn!("Failed to idle {} step line: {}", handle.motor, e);
    }
    if let Err(e) = gpio.write_digital(handle.enable, DRIVER_DISABLED) {
        tracing::error!("Cannot disable {} driver: {}; halting", handle.motor, e);
        std::process::abort();
    }
}

pub fn is_enabled(gpio: &Gpio, motor: Motor) -> bool {
    gpio.level(motor.enable_role()) == Some(DRIVER_ENABLED)
}

/// Issues step pulses for one motor at a time on the control thread.
pub struct PulseSequencer<'a> {
    gpio: &'a mut Gpio,
    clock: &'a dyn Clock,
    cancel: &'a CancelToken,
}

impl<'a> PulseSequencer<'a> {
    pub fn new(gpio: &'a mut Gpio, clock: &'a dyn Clock, cancel: &'a CancelToken) -> Self {
        Self { gpio, clock, cancel }
    }

    /// Run `request.count` pulse cycles: DIR, ENABLE, (STEP high, wait, STEP low, wait)*,
    /// then ENABLE off unless `leave_enabled`. Returns the number of pulses issued.
    pub fn step(&mut self, handle: &MotorHandle, request: &StepRequest) -> Result<u32, MotionError> {
        if request.period.is_zero() {
            return Err(MotionError::InvalidRequest("step period must be > 0".to_string()));
        }
        self.check_interlock(handle, request)?;

        // A held driver already has its direction latched.
        if !is_enabled(self.gpio, handle.motor) {
            self.gpio.write_digital(handle.direction, request.direction.level())?;
        }

        tracing::debug!(
            "{}: {} steps {} at {:?}/phase",
            handle.motor, request.count, request.direction, request.period
        );

        let mut guard = EnableGuard::engage(&mut *self.gpio, *handle)?;
        for _ in 0..request.count {
            guard.gpio().write_digital(handle.step, Level::High)?;
            scheduler::wait(self.clock, self.cancel, request.period)?;
            guard.gpio().write_digital(handle.step, Level::Low)?;
            scheduler::wait(self.clock, self.cancel, request.period)?;
        }

        if request.leave_enabled {
            guard.hold();
        } else {
            guard.release()?;
        }
        Ok(request.count)
    }

    fn check_interlock(&self, handle: &MotorHandle, request: &StepRequest) -> Result<(), MotionError> {
        let gpio: &Gpio = &*self.gpio;
        if let Some(other) = Motor::ALL
            .into_iter()
            .find(|&m| m != handle.motor && is_enabled(gpio, m))
        {
            return Err(MotionError::Interlock(format!(
                "{} is still enabled, refusing to step {}",
                other, handle.motor
            )));
        }
        if is_enabled(gpio, handle.motor)
            && gpio.level(handle.direction) != Some(request.direction.level())
        {
            return Err(MotionError::Interlock(format!(
                "direction change on {} while its driver is enabled",
                handle.motor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::{PinEvent, SimulatedBackend};
    use crate::hardware::ActuatorRegistry;
    use crate::motion::Direction;
    use crate::scheduler::InstantClock;
    use std::sync::Arc;
    use std::time::Duration;

    fn rig_gpio() -> (Gpio, SimulatedBackend) {
        let registry = Arc::new(ActuatorRegistry::standard().unwrap());
        let backend = SimulatedBackend::new();
        let mut gpio = Gpio::new(registry, Box::new(backend.clone()));
        gpio.configure_rig().unwrap();
        (gpio, backend)
    }

    fn motor1() -> MotorHandle {
        MotorHandle::new(Motor::Motor1, Duration::from_millis(5))
    }

    #[test]
    fn test_guard_drop_disables() {
        let (mut gpio, backend) = rig_gpio();
        {
            let _guard = EnableGuard::engage(&mut gpio, motor1()).unwrap();
        }
        assert_eq!(gpio.level(Motor::Motor1.enable_role()), Some(DRIVER_DISABLED));
        assert_eq!(
            backend.writes_to(12),
            vec![
                PinEvent::Write { pin: 12, level: Level::Low },
                PinEvent::Write { pin: 12, level: Level::High },
            ]
        );
    }

    #[test]
    fn test_abnormal_exit_idles_step_before_disabling() {
        let (mut gpio, backend) = rig_gpio();
        {
            let mut guard = EnableGuard::engage(&mut gpio, motor1()).unwrap();
            guard.gpio().write_digital(Motor::Motor1.step_role(), Level::High).unwrap();
        }
        assert_eq!(
            backend.writes(),
            vec![
                PinEvent::Write { pin: 12, level: Level::Low },
                PinEvent::Write { pin: 21, level: Level::High },
                PinEvent::Write { pin: 21, level: Level::Low },
                PinEvent::Write { pin: 12, level: Level::High },
            ]
        );
    }

    #[test]
    fn test_hold_keeps_driver_enabled() {
        let (mut gpio, _) = rig_gpio();
        EnableGuard::engage(&mut gpio, motor1()).unwrap().hold();
        assert!(is_enabled(&gpio, Motor::Motor1));
    }

    #[test]
    fn test_step_timing_contract() {
        let (mut gpio, _) = rig_gpio();
        let clock = InstantClock::new();
        let cancel = CancelToken::new();
        let request = StepRequest::new(3, Direction::Forward, Duration::from_millis(5)).unwrap();
        let pulses = PulseSequencer::new(&mut gpio, &clock, &cancel)
            .step(&motor1(), &request)
            .unwrap();
        assert_eq!(pulses, 3);
        // 2 x period per cycle
        assert_eq!(clock.elapsed(), Duration::from_millis(30));
    }

    #[test]
    fn test_step_pin_failure_still_disables() {
        let (mut gpio, backend) = rig_gpio();
        backend.fail_pin(21);
        let clock = InstantClock::new();
        let cancel = CancelToken::new();
        let request = StepRequest::new(5, Direction::Backward, Duration::from_millis(5)).unwrap();
        let err = PulseSequencer::new(&mut gpio, &clock, &cancel)
            .step(&motor1(), &request)
            .unwrap_err();
        assert!(matches!(err, MotionError::Pin(PinError::Backend { pin: 21, .. })));
        assert!(!is_enabled(&gpio, Motor::Motor1));
    }
}
