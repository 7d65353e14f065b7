//! # Rig Configuration
//!
//! Timing, servo positions, operation multiplier and network settings for the
//! rig, loaded from a TOML file. The pin map lives in `hardware::registry`.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [rig]
//! name = "sundial"
//! backend = "sim"
//! step_multiplier = 2
//!
//! [timing]
//! motor1_step_period_us = 5000
//! motor2_step_period_us = 6700
//!
//! [servo]
//! engaged_us = 790
//! disengaged_us = 500
//!
//! [server]
//! bind = "0.0.0.0:7070"
//! ```
//!
//! Every section and field is optional; missing values take the defaults below.

// src/config.rs - Single configuration file
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::hardware::ServoBounds;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the rig, its programs and its network endpoints.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RigConfig {
    #[serde(default)]
    pub rig: RigSection,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub servo: ServoConfig,
    #[serde(default)]
    pub actuator: ActuatorConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Record pin activity in memory.
    Sim,
    /// Raspberry Pi GPIO (needs the `rpi` feature).
    Rpi,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RigSection {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_backend")]
    pub backend: BackendKind,
    /// Steps issued per whole unit of the scale parameter.
    #[serde(default = "default_step_multiplier")]
    pub step_multiplier: u32,
}

impl Default for RigSection {
    fn default() -> Self {
        Self {
            name: default_name(),
            backend: default_backend(),
            step_multiplier: default_step_multiplier(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimingConfig {
    /// Half-cycle of the pin actuator's step signal.
    #[serde(default = "default_motor1_period")]
    pub motor1_step_period_us: u64,
    /// Half-cycle of the carriage's step signal.
    #[serde(default = "default_motor2_period")]
    pub motor2_step_period_us: u64,
    #[serde(default = "default_servo_settle")]
    pub servo_settle_ms: u64,
    #[serde(default = "default_travel_settle")]
    pub travel_settle_ms: u64,
}

impl TimingConfig {
    pub fn motor1_period(&self) -> Duration {
        Duration::from_micros(self.motor1_step_period_us)
    }

    pub fn motor2_period(&self) -> Duration {
        Duration::from_micros(self.motor2_step_period_us)
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            motor1_step_period_us: default_motor1_period(),
            motor2_step_period_us: default_motor2_period(),
            servo_settle_ms: default_servo_settle(),
            travel_settle_ms: default_travel_settle(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServoConfig {
    #[serde(default = "default_engaged")]
    pub engaged_us: u32,
    #[serde(default = "default_disengaged")]
    pub disengaged_us: u32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            engaged_us: default_engaged(),
            disengaged_us: default_disengaged(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActuatorConfig {
    /// Motor 1 steps between pins lowered and pins lifted.
    #[serde(default = "default_pin_travel")]
    pub pin_travel_steps: u32,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            pin_travel_steps: default_pin_travel(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { bind: default_bind() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SessionConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
    /// Longest a single remote operation may take, including all program delays.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
}

impl SessionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            connect_timeout_ms: default_connect_timeout(),
            request_timeout_ms: default_request_timeout(),
        }
    }
}

impl RigConfig {
    /// Check values the rig cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rig.step_multiplier == 0 {
            return Err(ConfigError::Invalid("rig.step_multiplier must be > 0".to_string()));
        }
        if self.timing.motor1_step_period_us == 0 || self.timing.motor2_step_period_us == 0 {
            return Err(ConfigError::Invalid("step periods must be > 0".to_string()));
        }
        let bounds = ServoBounds::default();
        for (key, width) in [
            ("servo.engaged_us", self.servo.engaged_us),
            ("servo.disengaged_us", self.servo.disengaged_us),
        ] {
            if !bounds.contains(width) {
                return Err(ConfigError::Invalid(format!(
                    "{} = {} outside {}..={} us",
                    key, width, bounds.min_us, bounds.max_us
                )));
            }
        }
        if self.session.connect_timeout_ms == 0 || self.session.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("session timeouts must be > 0".to_string()));
        }
        Ok(())
    }
}

// Default value functions
fn default_name() -> String { "sundial".to_string() }
fn default_backend() -> BackendKind { BackendKind::Sim }
fn default_step_multiplier() -> u32 { 2 }
fn default_motor1_period() -> u64 { 5_000 }
fn default_motor2_period() -> u64 { 6_700 }
fn default_servo_settle() -> u64 { 500 }
fn default_travel_settle() -> u64 { 1_000 }
fn default_engaged() -> u32 { 790 }
fn default_disengaged() -> u32 { 500 }
fn default_pin_travel() -> u32 { 450 }
fn default_bind() -> String { "0.0.0.0:7070".to_string() }
fn default_port() -> u16 { 7070 }
fn default_connect_timeout() -> u64 { 5_000 }
fn default_request_timeout() -> u64 { 120_000 }

/// Load and validate configuration from a TOML file at the given path.
pub fn load_config(path: &str) -> Result<RigConfig, ConfigError> {
    let config: RigConfig = match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!("Failed to parse config TOML: {}", e);
                return Err(ConfigError::Toml(e));
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file '{}': {}", path, e);
            return Err(ConfigError::Io(e));
        }
    };
    config.validate()?;
    Ok(config)
}
