// src/dispatch.rs - Operation name + scale parameter -> motion program run
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use thiserror::Error;

use crate::config::RigConfig;
use crate::hardware::{ActuatorRegistry, Gpio, PinBackend, RegistryError};
use crate::motion::{MotionError, ProgramCatalog, ProgramError, ProgramSettings};
use crate::rig::{MotorTiming, Rig};
use crate::scheduler::{CancelToken, Clock};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DispatchError {
    #[error("Unknown operation '{0}'")]
    UnknownOperation(String),
    #[error("Invalid scale parameter {0}: must be finite and >= 0")]
    InvalidScale(f64),
    #[error("Rig busy: another operation is in progress")]
    Busy,
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
    #[error("Control thread failed: {0}")]
    Join(String),
}

#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
    #[error("Program error: {0}")]
    Program(#[from] ProgramError),
    #[error("Motion error: {0}")]
    Motion(#[from] MotionError),
}

/// Outcome of one operation as seen by the operator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchResult {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl DispatchResult {
    pub fn completed(stdout: String) -> Self {
        Self { stdout, stderr: String::new(), success: true }
    }

    pub fn failure(stderr: String) -> Self {
        Self { stdout: String::new(), stderr, success: false }
    }

    /// Errors become stderr text with `success = false`.
    pub fn from_outcome(outcome: Result<DispatchResult, DispatchError>) -> Self {
        match outcome {
            Ok(result) => result,
            Err(e) => Self::failure(e.to_string()),
        }
    }
}

/// Whole units of `scale` times `multiplier`, e.g. 5.7 x2 -> 10.
pub fn step_count(scale: f64, multiplier: u32) -> Result<u32, DispatchError> {
    if !scale.is_finite() || scale < 0.0 {
        return Err(DispatchError::InvalidScale(scale));
    }
    let steps = scale.trunc() * f64::from(multiplier);
    if steps > f64::from(u32::MAX) {
        return Err(DispatchError::InvalidScale(scale));
    }
    Ok(steps as u32)
}

/// Runs one named program at a time against the rig.
///
/// A cancel is latched while any dispatch is in flight, including one still
/// waiting for the control thread, and cleared when the last one returns.
pub struct Dispatcher {
    catalog: ProgramCatalog,
    rig: Mutex<Rig>,
    cancel: CancelToken,
    in_flight: AtomicUsize,
    step_multiplier: u32,
}

/// Counts a dispatch as in flight until dropped.
struct InFlight<'d> {
    dispatcher: &'d Dispatcher,
}

impl<'d> InFlight<'d> {
    fn enter(dispatcher: &'d Dispatcher) -> Self {
        dispatcher.in_flight.fetch_add(1, Ordering::SeqCst);
        Self { dispatcher }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if self.dispatcher.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.dispatcher.cancel.reset();
        }
    }
}

impl Dispatcher {
    pub fn new(catalog: ProgramCatalog, rig: Rig, step_multiplier: u32) -> Self {
        let cancel = rig.cancel_token();
        Self {
            catalog,
            rig: Mutex::new(rig),
            cancel,
            in_flight: AtomicUsize::new(0),
            step_multiplier,
        }
    }

    /// Build the registry, rig and standard catalog from configuration.
    pub fn from_config(
        config: &RigConfig,
        backend: Box<dyn PinBackend>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, SetupError> {
        let registry = Arc::new(ActuatorRegistry::standard()?);
        let bounds = registry.servo_bounds();
        let gpio = Gpio::new(registry, backend);
        let rig = Rig::new(gpio, clock, CancelToken::new(), MotorTiming::from(&config.timing))?;
        let catalog = ProgramCatalog::standard(&ProgramSettings::from(config), bounds)?;
        tracing::info!(
            "Dispatcher ready: {} operations, x{} step multiplier",
            catalog.len(),
            config.rig.step_multiplier
        );
        Ok(Self::new(catalog, rig, config.rig.step_multiplier))
    }

    pub fn catalog(&self) -> &ProgramCatalog {
        &self.catalog
    }

    pub fn step_multiplier(&self) -> u32 {
        self.step_multiplier
    }

    /// Validate, run and report one operation. Blocks for the whole program.
    pub fn dispatch(&self, operation: &str, scale: f64) -> Result<DispatchResult, DispatchError> {
        let _in_flight = InFlight::enter(self);
        let program = self
            .catalog
            .get(operation)
            .ok_or_else(|| DispatchError::UnknownOperation(operation.to_string()))?;
        let steps = step_count(scale, self.step_multiplier)?;

        let mut rig = match self.rig.try_lock() {
            Ok(rig) => rig,
            Err(TryLockError::WouldBlock) => return Err(DispatchError::Busy),
            Err(TryLockError::Poisoned(poisoned)) => {
                tracing::warn!("Previous run panicked; continuing with recovered rig state");
                poisoned.into_inner()
            }
        };

        tracing::info!("Dispatch '{}' scale={} -> {} steps", operation, scale, steps);
        let report = rig.run_program(program, steps)?;
        Ok(DispatchResult::completed(report.to_string()))
    }

    /// Run [`Dispatcher::dispatch`] on the blocking pool.
    pub async fn dispatch_blocking(
        self: &Arc<Self>,
        operation: String,
        scale: f64,
    ) -> Result<DispatchResult, DispatchError> {
        let _in_flight = InFlight::enter(self);
        let dispatcher = Arc::clone(self);
        tokio::task::spawn_blocking(move || dispatcher.dispatch(&operation, scale))
            .await
            .map_err(|e| DispatchError::Join(e.to_string()))?
    }

    /// Interrupt the operation in progress or about to start. Ignored when
    /// nothing is in flight.
    pub fn cancel(&self) {
        if self.in_flight.load(Ordering::SeqCst) == 0 {
            tracing::debug!("Cancellation requested with no operation in flight");
            return;
        }
        tracing::warn!("Cancellation requested");
        self.cancel.cancel();
    }

    pub fn is_busy(&self) -> bool {
        matches!(self.rig.try_lock(), Err(TryLockError::WouldBlock))
    }

    /// Run `f` with exclusive access to the rig (tests, shutdown).
    pub fn with_rig<R>(&self, f: impl FnOnce(&mut Rig) -> R) -> R {
        let mut rig = self.rig.lock().unwrap_or_else(|p| p.into_inner());
        f(&mut rig)
    }

    pub fn shutdown(&self) {
        self.with_rig(|rig| rig.shutdown());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::sim::SimulatedBackend;
    use crate::scheduler::InstantClock;

    fn dispatcher() -> Dispatcher {
        Dispatcher::from_config(
            &RigConfig::default(),
            Box::new(SimulatedBackend::new()),
            Arc::new(InstantClock::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_cancel_before_run_starts_is_kept() {
        let dispatcher = dispatcher();
        // An accepted request not yet on the control thread.
        let queued = InFlight::enter(&dispatcher);
        dispatcher.cancel();

        let err = dispatcher.dispatch("reconnect_pins", 0.0).unwrap_err();
        assert_eq!(err, DispatchError::Motion(MotionError::Interrupted));
        assert!(dispatcher.cancel.is_cancelled());

        drop(queued);
        assert!(!dispatcher.cancel.is_cancelled());
        assert!(dispatcher.dispatch("reconnect_pins", 0.0).is_ok());
    }

    #[test]
    fn test_cancel_while_idle_is_ignored() {
        let dispatcher = dispatcher();
        dispatcher.cancel();
        assert!(!dispatcher.cancel.is_cancelled());
        let result = dispatcher.dispatch("step_backward", 1.0).unwrap();
        assert!(result.stdout.contains("motor2 backward 2 steps"));
    }

    #[test]
    fn test_step_count_truncates_then_multiplies() {
        assert_eq!(step_count(5.0, 2).unwrap(), 10);
        assert_eq!(step_count(5.9, 2).unwrap(), 10);
        assert_eq!(step_count(0.4, 2).unwrap(), 0);
        assert_eq!(step_count(0.0, 3).unwrap(), 0);
    }

    #[test]
    fn test_step_count_rejects_bad_scale() {
        for scale in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -1.0, 1e12] {
            assert!(matches!(step_count(scale, 2), Err(DispatchError::InvalidScale(_))));
        }
    }

    #[test]
    fn test_outcome_mapping() {
        let ok = DispatchResult::from_outcome(Ok(DispatchResult::completed("done".into())));
        assert!(ok.success);
        assert!(ok.stderr.is_empty());

        let err = DispatchResult::from_outcome(Err(DispatchError::UnknownOperation("jump".into())));
        assert!(!err.success);
        assert_eq!(err.stderr, "Unknown operation 'jump'");
    }
}
