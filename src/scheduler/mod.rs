// src/scheduler/mod.rs - Timing contract and operator cancellation
pub mod std_time;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub use std_time::StdClock;

/// Longest uninterrupted sleep; cancellation is checked between slices.
pub const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Blocking time source for the control loop.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Shared flag raised by the operator (SIGINT, remote cancel).
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Returned by [`wait`] when the token was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupted;

/// Block for `duration`, giving up as soon as `cancel` is observed.
pub fn wait(clock: &dyn Clock, cancel: &CancelToken, duration: Duration) -> Result<(), Interrupted> {
    let mut remaining = duration;
    loop {
        if cancel.is_cancelled() {
            return Err(Interrupted);
        }
        if remaining.is_zero() {
            return Ok(());
        }
        let slice = remaining.min(CANCEL_POLL);
        clock.sleep(slice);
        remaining -= slice;
    }
}

/// Clock that never blocks. It accumulates the requested time and can raise
/// a cancel token on a chosen sleep call.
#[derive(Debug)]
pub struct InstantClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
    sleeps: AtomicUsize,
    trip: Option<(usize, CancelToken)>,
}

impl InstantClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: AtomicUsize::new(0),
            trip: None,
        }
    }

    /// Cancel `token` during the `nth` sleep (1-based).
    pub fn cancelling_after(nth: usize, token: CancelToken) -> Self {
        Self {
            trip: Some((nth, token)),
            ..Self::new()
        }
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn sleep_count(&self) -> usize {
        self.sleeps.load(Ordering::SeqCst)
    }
}

impl Default for InstantClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for InstantClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        *self.elapsed.lock().unwrap_or_else(|p| p.into_inner()) += duration;
        let n = self.sleeps.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some((nth, token)) = &self.trip {
            if n == *nth {
                token.cancel();
            }
        }
    }
}
