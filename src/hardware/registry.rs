// src/hardware/registry.rs - Fixed actuator role to GPIO mapping
use std::collections::HashMap;
use std::fmt;
use std::ops::RangeInclusive;
use thiserror::Error;

/// BCM GPIO number.
pub type PinId = u8;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Actuator role {0} has no pin assigned")]
    Unmapped(ActuatorRole),
    #[error("Actuator role {0} is mapped more than once")]
    DuplicateRole(ActuatorRole),
    #[error("GPIO {pin} is shared by {first} and {second}")]
    SharedPin {
        pin: PinId,
        first: ActuatorRole,
        second: ActuatorRole,
    },
    #[error("Invalid servo bounds {min}..={max} us")]
    InvalidBounds { min: u32, max: u32 },
}

/// Logical role of a line on the rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ActuatorRole {
    Motor1Direction,
    Motor1Step,
    Motor1Enable,
    Motor2Direction,
    Motor2Step,
    Motor2Enable,
    ServoPwm,
}

impl ActuatorRole {
    pub const ALL: [ActuatorRole; 7] = [
        ActuatorRole::Motor1Direction,
        ActuatorRole::Motor1Step,
        ActuatorRole::Motor1Enable,
        ActuatorRole::Motor2Direction,
        ActuatorRole::Motor2Step,
        ActuatorRole::Motor2Enable,
        ActuatorRole::ServoPwm,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActuatorRole::Motor1Direction => "motor1.dir",
            ActuatorRole::Motor1Step => "motor1.step",
            ActuatorRole::Motor1Enable => "motor1.enable",
            ActuatorRole::Motor2Direction => "motor2.dir",
            ActuatorRole::Motor2Step => "motor2.step",
            ActuatorRole::Motor2Enable => "motor2.enable",
            ActuatorRole::ServoPwm => "servo.pwm",
        }
    }
}

impl fmt::Display for ActuatorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical pulse-width limits of the servo, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoBounds {
    pub min_us: u32,
    pub max_us: u32,
}

impl ServoBounds {
    pub fn new(min_us: u32, max_us: u32) -> Result<Self, RegistryError> {
        if min_us == 0 || min_us >= max_us {
            return Err(RegistryError::InvalidBounds { min: min_us, max: max_us });
        }
        Ok(Self { min_us, max_us })
    }

    pub fn contains(&self, width_us: u32) -> bool {
        self.range().contains(&width_us)
    }

    pub fn clamp(&self, width_us: u32) -> u32 {
        width_us.clamp(self.min_us, self.max_us)
    }

    pub fn range(&self) -> RangeInclusive<u32> {
        self.min_us..=self.max_us
    }
}

impl Default for ServoBounds {
    fn default() -> Self {
        Self {
            min_us: SERVO_MIN_US,
            max_us: SERVO_MAX_US,
        }
    }
}

pub const SERVO_MIN_US: u32 = 500;
pub const SERVO_MAX_US: u32 = 2500;

/// Wiring of the rig. Not configurable at runtime.
pub const PIN_TABLE: [(ActuatorRole, PinId); 7] = [
    (ActuatorRole::Motor1Direction, 20),
    (ActuatorRole::Motor1Step, 21),
    (ActuatorRole::Motor1Enable, 12),
    (ActuatorRole::Motor2Direction, 22),
    (ActuatorRole::Motor2Step, 23),
    (ActuatorRole::Motor2Enable, 24),
    (ActuatorRole::ServoPwm, 11),
];

/// Immutable role -> pin mapping, built once at startup and shared by reference.
#[derive(Debug, Clone)]
pub struct ActuatorRegistry {
    pins: HashMap<ActuatorRole, PinId>,
    servo_bounds: ServoBounds,
}

impl ActuatorRegistry {
    /// The rig as wired.
    pub fn standard() -> Result<Self, RegistryError> {
        Self::from_table(&PIN_TABLE, ServoBounds::default())
    }

    pub fn from_table(
        table: &[(ActuatorRole, PinId)],
        servo_bounds: ServoBounds,
    ) -> Result<Self, RegistryError> {
        let mut pins = HashMap::with_capacity(table.len());
        let mut owners: HashMap<PinId, ActuatorRole> = HashMap::with_capacity(table.len());

        for &(role, pin) in table {
            if pins.insert(role, pin).is_some() {
                return Err(RegistryError::DuplicateRole(role));
            }
            if let Some(&first) = owners.get(&pin) {
                return Err(RegistryError::SharedPin { pin, first, second: role });
            }
            owners.insert(pin, role);
        }

        if let Some(&missing) = ActuatorRole::ALL.iter().find(|r| !pins.contains_key(r)) {
            return Err(RegistryError::Unmapped(missing));
        }

        tracing::debug!("Actuator registry built with {} roles", pins.len());
        Ok(Self { pins, servo_bounds })
    }

    pub fn resolve(&self, role: ActuatorRole) -> PinId {
        // Every role is checked in from_table.
        self.pins[&role]
    }

    pub fn servo_bounds(&self) -> ServoBounds {
        self.servo_bounds
    }

    pub fn roles(&self) -> impl Iterator<Item = (ActuatorRole, PinId)> + '_ {
        ActuatorRole::ALL.iter().map(move |&r| (r, self.resolve(r)))
    }
}
