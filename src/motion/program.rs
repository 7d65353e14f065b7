// src/motion/program.rs - Named, validated sequences of motion operations
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::hardware::ServoBounds;

use super::{Direction, Motor};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProgramError {
    #[error("Program name must not be empty")]
    EmptyName,
    #[error("Program '{program}' op {index}: {motor} left enabled without a following step on the same motor")]
    DanglingEnable {
        program: String,
        index: usize,
        motor: Motor,
    },
    #[error("Program '{program}' op {index}: chained step on {motor} changes direction")]
    ChainedDirectionChange {
        program: String,
        index: usize,
        motor: Motor,
    },
    #[error("Program '{program}' op {index}: servo width {width_us} us outside {min_us}..={max_us} us")]
    ServoOutOfBounds {
        program: String,
        index: usize,
        width_us: u32,
        min_us: u32,
        max_us: u32,
    },
}

/// Where a step op takes its count from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCount {
    Fixed(u32),
    /// The count the dispatcher derived from the scale parameter.
    Scaled,
}

impl StepCount {
    pub fn resolve(&self, scaled: u32) -> u32 {
        match *self {
            StepCount::Fixed(n) => n,
            StepCount::Scaled => scaled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionOp {
    Step {
        motor: Motor,
        count: StepCount,
        direction: Direction,
        leave_enabled: bool,
    },
    Servo { width_us: u32 },
    Delay(Duration),
}

impl MotionOp {
    pub fn step(motor: Motor, count: StepCount, direction: Direction) -> Self {
        MotionOp::Step {
            motor,
            count,
            direction,
            leave_enabled: false,
        }
    }

    /// Same as [`MotionOp::step`] but the next op must step the same motor.
    pub fn step_chained(motor: Motor, count: StepCount, direction: Direction) -> Self {
        MotionOp::Step {
            motor,
            count,
            direction,
            leave_enabled: true,
        }
    }

    pub fn servo(width_us: u32) -> Self {
        MotionOp::Servo { width_us }
    }

    pub fn delay_ms(ms: u64) -> Self {
        MotionOp::Delay(Duration::from_millis(ms))
    }
}

impl fmt::Display for MotionOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionOp::Step { motor, count, direction, leave_enabled } => {
                match count {
                    StepCount::Fixed(n) => write!(f, "step {} {} x{}", motor, direction, n)?,
                    StepCount::Scaled => write!(f, "step {} {} x<scale>", motor, direction)?,
                }
                if *leave_enabled {
                    f.write_str(" (hold)")?;
                }
                Ok(())
            }
            MotionOp::Servo { width_us } => write!(f, "servo {} us", width_us),
            MotionOp::Delay(d) => write!(f, "wait {} ms", d.as_millis()),
        }
    }
}

/// Immutable once built; strictly sequential when run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionProgram {
    name: String,
    ops: Vec<MotionOp>,
}

impl MotionProgram {
    pub fn new(
        name: impl Into<String>,
        ops: Vec<MotionOp>,
        bounds: ServoBounds,
    ) -> Result<Self, ProgramError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ProgramError::EmptyName);
        }

        for (index, op) in ops.iter().enumerate() {
            match *op {
                MotionOp::Servo { width_us } if !bounds.contains(width_us) => {
                    return Err(ProgramError::ServoOutOfBounds {
                        program: name,
                        index,
                        width_us,
                        min_us: bounds.min_us,
                        max_us: bounds.max_us,
                    });
                }
                MotionOp::Step { motor, direction, leave_enabled: true, .. } => {
                    match ops.get(index + 1) {
                        Some(MotionOp::Step { motor: next, direction: next_dir, .. })
                            if *next == motor =>
                        {
                            if *next_dir != direction {
                                return Err(ProgramError::ChainedDirectionChange {
                                    program: name,
                                    index: index + 1,
                                    motor,
                                });
                            }
                        }
                        _ => {
                            return Err(ProgramError::DanglingEnable { program: name, index, motor });
                        }
                    }
                }
                _ => {}
            }
        }

        Ok(Self { name, ops })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ops(&self) -> &[MotionOp] {
        &self.ops
    }

    /// Motors stepped by this program, in first-use order.
    pub fn motors(&self) -> Vec<Motor> {
        let mut motors = Vec::new();
        for op in &self.ops {
            if let MotionOp::Step { motor, .. } = op {
                if !motors.contains(motor) {
                    motors.push(*motor);
                }
            }
        }
        motors
    }

    pub fn uses_scale(&self) -> bool {
        self.ops
            .iter()
            .any(|op| matches!(op, MotionOp::Step { count: StepCount::Scaled, .. }))
    }

    /// Sum of all declared delays; step time excluded.
    pub fn declared_delay(&self) -> Duration {
        self.ops
            .iter()
            .filter_map(|op| match op {
                MotionOp::Delay(d) => Some(*d),
                _ => None,
            })
            .sum()
    }
}

/// What a program run did; rendered as the captured output text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramReport {
    pub program: String,
    pub operations: usize,
    pub pulses: BTreeMap<Motor, u32>,
    pub servo_writes: usize,
    pub lines: Vec<String>,
}

impl ProgramReport {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            ..Default::default()
        }
    }

    pub fn record(&mut self, line: String) {
        self.operations += 1;
        self.lines.push(line);
    }

    pub fn pulses_for(&self, motor: Motor) -> u32 {
        self.pulses.get(&motor).copied().unwrap_or(0)
    }
}

impl fmt::Display for ProgramReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}: {}", self.program, line)?;
        }
        write!(f, "{}: completed {} operations", self.program, self.operations)
    }
}
