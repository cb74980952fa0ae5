use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of commit timestamps in milliseconds since the UNIX epoch.
///
/// `sleep` is part of the trait so that a clock which is driven by hand can
/// make progress while a caller waits for it.
pub trait Clock: Send + Sync + 'static {
    fn now_millis(&self) -> i64;

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

fn wall_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

/// Wall clock via `std::time::SystemTime`. Subject to NTP adjustments.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        wall_millis()
    }
}

/// TSC-based clock via `quanta`, anchored to the wall clock at construction.
///
/// Never jumps backwards, unlike [`SystemClock`].
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall_ms: i64,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        Self {
            clock,
            start_wall_ms: wall_millis(),
            start_instant,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now_millis(&self) -> i64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        let delta_ms = i64::try_from(delta.as_millis()).unwrap_or(i64::MAX);
        self.start_wall_ms.saturating_add(delta_ms)
    }
}

/// Clock advanced only explicitly or by sleeping on it. Used by tests.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
        }
    }

    pub fn set(&self, now_ms: i64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, delta_ms: i64) {
        self.now.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        let step = i64::try_from(duration.as_millis()).unwrap_or(1).max(1);
        self.advance(step);
    }
}
