// src/motion/catalog.rs - The closed set of rig operations
use std::collections::BTreeMap;

use crate::config::RigConfig;
use crate::hardware::ServoBounds;

use super::servo::{SERVO_DISENGAGED_US, SERVO_ENGAGED_US};
use super::{Direction, Motor, MotionOp, MotionProgram, ProgramError, StepCount};

/// Tunables the standard programs are built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSettings {
    pub servo_engaged_us: u32,
    pub servo_disengaged_us: u32,
    pub pin_travel_steps: u32,
    pub servo_settle_ms: u64,
    pub travel_settle_ms: u64,
}

impl Default for ProgramSettings {
    fn default() -> Self {
        Self {
            servo_engaged_us: SERVO_ENGAGED_US,
            servo_disengaged_us: SERVO_DISENGAGED_US,
            pin_travel_steps: 450,
            servo_settle_ms: 500,
            travel_settle_ms: 1000,
        }
    }
}

impl From<&RigConfig> for ProgramSettings {
    fn from(config: &RigConfig) -> Self {
        Self {
            servo_engaged_us: config.servo.engaged_us,
            servo_disengaged_us: config.servo.disengaged_us,
            pin_travel_steps: config.actuator.pin_travel_steps,
            servo_settle_ms: config.timing.servo_settle_ms,
            travel_settle_ms: config.timing.travel_settle_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProgramCatalog {
    programs: BTreeMap<String, MotionProgram>,
}

impl ProgramCatalog {
    pub fn new(programs: Vec<MotionProgram>) -> Self {
        Self {
            programs: programs
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
        }
    }

    /// Operations of the rig, one per control panel action.
    pub fn standard(settings: &ProgramSettings, bounds: ServoBounds) -> Result<Self, ProgramError> {
        let lift_pins = [
            MotionOp::servo(settings.servo_disengaged_us),
            MotionOp::delay_ms(settings.servo_settle_ms),
            MotionOp::step(Motor::Motor1, StepCount::Fixed(settings.pin_travel_steps), Direction::Forward),
            MotionOp::delay_ms(settings.travel_settle_ms),
        ];
        let lower_pins = [
            MotionOp::servo(settings.servo_engaged_us),
            MotionOp::delay_ms(settings.servo_settle_ms),
            MotionOp::step(Motor::Motor1, StepCount::Fixed(settings.pin_travel_steps), Direction::Backward),
            MotionOp::delay_ms(settings.travel_settle_ms),
        ];
        let index_device = |direction| {
            let mut ops = lift_pins.to_vec();
            ops.push(MotionOp::step(Motor::Motor2, StepCount::Scaled, direction));
            ops.push(MotionOp::delay_ms(settings.travel_settle_ms));
            ops.extend_from_slice(&lower_pins);
            ops
        };

        let programs = vec![
            MotionProgram::new("connect", vec![], bounds)?,
            MotionProgram::new("test_connection", vec![], bounds)?,
            MotionProgram::new("disconnect", vec![], bounds)?,
            MotionProgram::new(
                "step_forward",
                vec![MotionOp::step(Motor::Motor2, StepCount::Scaled, Direction::Forward)],
                bounds,
            )?,
            MotionProgram::new(
                "step_backward",
                vec![MotionOp::step(Motor::Motor2, StepCount::Scaled, Direction::Backward)],
                bounds,
            )?,
            MotionProgram::new("disconnect_pins", lift_pins.to_vec(), bounds)?,
            MotionProgram::new("reconnect_pins", lower_pins.to_vec(), bounds)?,
            MotionProgram::new("test_first_device", index_device(Direction::Forward), bounds)?,
            MotionProgram::new("next_device", index_device(Direction::Forward), bounds)?,
            MotionProgram::new("previous_device", index_device(Direction::Backward), bounds)?,
        ];
        Ok(Self::new(programs))
    }

    pub fn get(&self, name: &str) -> Option<&MotionProgram> {
        self.programs.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.programs.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.programs.keys().map(String::as_str)
    }

    pub fn programs(&self) -> impl Iterator<Item = &MotionProgram> {
        self.programs.values()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> ProgramCatalog {
        ProgramCatalog::standard(&ProgramSettings::default(), ServoBounds::default()).unwrap()
    }

    #[test]
    fn test_standard_catalog_names() {
        let catalog = catalog();
        let names: Vec<_> = catalog.names().collect();
        assert_eq!(
            names,
            vec![
                "connect",
                "disconnect",
                "disconnect_pins",
                "next_device",
                "previous_device",
                "reconnect_pins",
                "step_backward",
                "step_forward",
                "test_connection",
                "test_first_device",
            ]
        );
    }

    #[test]
    fn test_first_device_sequence() {
        let catalog = catalog();
        let program = catalog.get("test_first_device").unwrap();
        let ops = program.ops();
        assert_eq!(ops.len(), 10);
        assert_eq!(ops[0], MotionOp::servo(500));
        assert_eq!(
            ops[2],
            MotionOp::step(Motor::Motor1, StepCount::Fixed(450), Direction::Forward)
        );
        assert_eq!(ops[4], MotionOp::step(Motor::Motor2, StepCount::Scaled, Direction::Forward));
        assert_eq!(ops[6], MotionOp::servo(790));
        assert_eq!(
            ops[8],
            MotionOp::step(Motor::Motor1, StepCount::Fixed(450), Direction::Backward)
        );
        assert_eq!(program.motors(), vec![Motor::Motor1, Motor::Motor2]);
    }

    #[test]
    fn test_settings_out_of_bounds_rejected() {
        let settings = ProgramSettings { servo_engaged_us: 4000, ..Default::default() };
        assert!(ProgramCatalog::standard(&settings, ServoBounds::default()).is_err());
    }
}
