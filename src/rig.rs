// src/rig.rs - Owns the pins and runs motion programs on the control thread
use std::sync::Arc;
use std::time::Duration;

use crate::config::TimingConfig;
use crate::hardware::{Gpio, Level};
use crate::motion::stepper::{self, DRIVER_DISABLED};
use crate::motion::{
    Motor, MotorHandle, MotionError, MotionOp, MotionProgram, ProgramReport, PulseSequencer,
    ServoPositioner, StepRequest,
};
use crate::scheduler::{self, CancelToken, Clock};

/// Per-motor step periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorTiming {
    pub motor1: Duration,
    pub motor2: Duration,
}

impl From<&TimingConfig> for MotorTiming {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            motor1: timing.motor1_period(),
            motor2: timing.motor2_period(),
        }
    }
}

impl Default for MotorTiming {
    fn default() -> Self {
        MotorTiming::from(&TimingConfig::default())
    }
}

pub struct Rig {
    gpio: Gpio,
    clock: Arc<dyn Clock>,
    cancel: CancelToken,
    motor1: MotorHandle,
    motor2: MotorHandle,
    servo: ServoPositioner,
}

impl Rig {
    /// Configure every line and put both drivers in the disabled state.
    pub fn new(
        mut gpio: Gpio,
        clock: Arc<dyn Clock>,
        cancel: CancelToken,
        timing: MotorTiming,
    ) -> Result<Self, MotionError> {
        gpio.configure_rig()?;
        let motor1 = MotorHandle::new(Motor::Motor1, timing.motor1);
        let motor2 = MotorHandle::new(Motor::Motor2, timing.motor2);
        for handle in [&motor1, &motor2] {
            gpio.write_digital(handle.enable, DRIVER_DISABLED)?;
            gpio.write_digital(handle.step, Level::Low)?;
        }
        tracing::info!("Rig ready, both drivers disabled");
        Ok(Self {
            gpio,
            clock,
            cancel,
            motor1,
            motor2,
            servo: ServoPositioner::new(),
        })
    }

    pub fn handle(&self, motor: Motor) -> &MotorHandle {
        match motor {
            Motor::Motor1 => &self.motor1,
            Motor::Motor2 => &self.motor2,
        }
    }

    pub fn gpio(&self) -> &Gpio {
        &self.gpio
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run one step request outside of a program. The driver is always
    /// disabled afterwards; only a validated program may hold it.
    pub fn step(&mut self, motor: Motor, request: &StepRequest) -> Result<u32, MotionError> {
        if request.leave_enabled {
            return Err(MotionError::InvalidRequest(
                "leave_enabled is only allowed inside a program".to_string(),
            ));
        }
        let handle = *self.handle(motor);
        PulseSequencer::new(&mut self.gpio, self.clock.as_ref(), &self.cancel).step(&handle, request)
    }

    pub fn set_servo(&mut self, width_us: u32) -> Result<bool, MotionError> {
        Ok(self.servo.set_position(&mut self.gpio, width_us)?)
    }

    /// Execute `program` op by op. `scaled_steps` is used for
    /// [`crate::motion::StepCount::Scaled`] ops. On any failure both drivers
    /// are disabled before the error is returned.
    pub fn run_program(
        &mut self,
        program: &MotionProgram,
        scaled_steps: u32,
    ) -> Result<ProgramReport, MotionError> {
        tracing::info!("Running program '{}' ({} ops)", program.name(), program.ops().len());
        let started = self.clock.now();
        let mut report = ProgramReport::new(program.name());

        match self.execute_ops(program, scaled_steps, &mut report) {
            Ok(()) => {
                tracing::info!(
                    "Program '{}' finished in {:?}",
                    program.name(),
                    self.clock.now().duration_since(started)
                );
                Ok(report)
            }
            Err(e) => {
                tracing::warn!("Program '{}' aborted: {}", program.name(), e);
                self.safety_pass(&Motor::ALL);
                Err(e)
            }
        }
    }

    fn execute_ops(
        &mut self,
        program: &MotionProgram,
        scaled_steps: u32,
        report: &mut ProgramReport,
    ) -> Result<(), MotionError> {
        for (index, op) in program.ops().iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(MotionError::Interrupted);
            }
            tracing::debug!("{}[{}]: {}", program.name(), index, op);

            match *op {
                MotionOp::Step { motor, count, direction, leave_enabled } => {
                    let handle = *self.handle(motor);
                    let request = StepRequest::new(count.resolve(scaled_steps), direction, handle.step_period)?
                        .leave_enabled(leave_enabled);
                    let pulses = PulseSequencer::new(&mut self.gpio, self.clock.as_ref(), &self.cancel)
                        .step(&handle, &request)?;
                    *report.pulses.entry(motor).or_insert(0) += pulses;
                    report.record(format!("{} {} {} steps", motor, direction, pulses));
                }
                MotionOp::Servo { width_us } => {
                    let written = self.servo.set_position(&mut self.gpio, width_us)?;
                    if written {
                        report.servo_writes += 1;
                    }
                    report.record(format!("servo {} us", width_us));
                }
                MotionOp::Delay(duration) => {
                    scheduler::wait(self.clock.as_ref(), &self.cancel, duration)?;
                    report.record(format!("waited {} ms", duration.as_millis()));
                }
            }
        }
        Ok(())
    }

    /// Disable the given motors' drivers. Safe to repeat; never fails.
    pub fn safety_pass(&mut self, motors: &[Motor]) {
        for &motor in motors {
            let handle = *self.handle(motor);
            stepper::force_disable(&mut self.gpio, &handle);
        }
        tracing::info!("Safety pass complete for {:?}", motors);
    }

    /// Disable both drivers and hand the lines back to the backend.
    pub fn shutdown(&mut self) {
        self.safety_pass(&Motor::ALL);
        self.gpio.release_all();
        tracing::info!("Rig shut down");
    }
}
