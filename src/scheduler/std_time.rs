use super::Clock;

/// Wall-clock time source using std::time.
/// Sleeps block the calling thread; it is meant for the control thread only.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdClock;

impl Clock for StdClock {
    /// Returns the current monotonic time.
    fn now(&self) -> std::time::Instant {
        std::time::Instant::now()
    }

    /// Sleeps the current thread for the specified duration.
    fn sleep(&self, duration: std::time::Duration) {
        std::thread::sleep(duration)
    }
}
