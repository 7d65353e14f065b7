// src/lib.rs - Sundial rig: two steppers and a servo driven over GPIO
pub mod communication;
pub mod config;
pub mod dispatch;
pub mod hardware;
pub mod motion;
pub mod panel;
pub mod rig;
pub mod scheduler;

pub use config::{load_config, RigConfig};
pub use dispatch::{DispatchError, DispatchResult, Dispatcher};
pub use rig::Rig;
