// src/motion/mod.rs - Stepper/servo actuation primitives and motion programs
pub mod catalog;
pub mod program;
pub mod servo;
pub mod stepper;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::hardware::{ActuatorRole, Level, PinError};
use crate::scheduler::Interrupted;

pub use catalog::{ProgramCatalog, ProgramSettings};
pub use program::{MotionOp, MotionProgram, ProgramError, ProgramReport, StepCount};
pub use servo::{ServoCommand, ServoPositioner};
pub use stepper::{EnableGuard, PulseSequencer};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MotionError {
    #[error(transparent)]
    Pin(#[from] PinError),
    #[error("Interlock: {0}")]
    Interlock(String),
    #[error("Invalid step request: {0}")]
    InvalidRequest(String),
    #[error("Interrupted by operator")]
    Interrupted,
}

impl From<Interrupted> for MotionError {
    fn from(_: Interrupted) -> Self {
        MotionError::Interrupted
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Motor {
    /// Lifts and lowers the contact pins.
    Motor1,
    /// Moves the board carriage between devices.
    Motor2,
}

impl Motor {
    pub const ALL: [Motor; 2] = [Motor::Motor1, Motor::Motor2];

    pub fn direction_role(&self) -> ActuatorRole {
        match self {
            Motor::Motor1 => ActuatorRole::Motor1Direction,
            Motor::Motor2 => ActuatorRole::Motor2Direction,
        }
    }

    pub fn step_role(&self) -> ActuatorRole {
        match self {
            Motor::Motor1 => ActuatorRole::Motor1Step,
            Motor::Motor2 => ActuatorRole::Motor2Step,
        }
    }

    pub fn enable_role(&self) -> ActuatorRole {
        match self {
            Motor::Motor1 => ActuatorRole::Motor1Enable,
            Motor::Motor2 => ActuatorRole::Motor2Enable,
        }
    }
}

impl fmt::Display for Motor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Motor::Motor1 => f.write_str("motor1"),
            Motor::Motor2 => f.write_str("motor2"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Forward,
    Backward,
}

impl Direction {
    /// Level written to the driver's DIR input.
    pub fn level(&self) -> Level {
        match self {
            Direction::Forward => Level::High,
            Direction::Backward => Level::Low,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => f.write_str("forward"),
            Direction::Backward => f.write_str("backward"),
        }
    }
}

/// The three driver lines of one stepper plus its pulse period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorHandle {
    pub motor: Motor,
    pub direction: ActuatorRole,
    pub step: ActuatorRole,
    pub enable: ActuatorRole,
    pub step_period: Duration,
}

impl MotorHandle {
    pub fn new(motor: Motor, step_period: Duration) -> Self {
        Self {
            motor,
            direction: motor.direction_role(),
            step: motor.step_role(),
            enable: motor.enable_role(),
            step_period,
        }
    }
}

/// One stepping run; built per invocation and consumed by the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepRequest {
    pub count: u32,
    pub direction: Direction,
    pub period: Duration,
    pub leave_enabled: bool,
}

impl StepRequest {
    pub fn new(count: u32, direction: Direction, period: Duration) -> Result<Self, MotionError> {
        if period.is_zero() {
            return Err(MotionError::InvalidRequest("step period must be > 0".to_string()));
        }
        Ok(Self {
            count,
            direction,
            period,
            leave_enabled: false,
        })
    }

    pub fn leave_enabled(mut self, leave: bool) -> Self {
        self.leave_enabled = leave;
        self
    }
}
