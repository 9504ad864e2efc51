//! Injectable clock, per the design note that every time-dependent component
//! (rate limiter, NAT tracker, amplification-attack wait) takes its notion of
//! "now" as a parameter rather than calling `Instant::now()`/`SystemTime::now()`
//! directly, so tests can drive time deterministically.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

/// A source of monotonic and wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
    fn system_now(&self) -> SystemTime;
}

/// The real system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub type SharedClock = Arc<dyn Clock>;

pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// A clock whose `now()` is advanced manually, for deterministic tests of
/// sliding-window rate limiters, history eviction, and timed probes.
#[cfg(any(test, feature = "test-util"))]
pub mod test_util {
    use super::*;
    use std::sync::Mutex;

    pub struct ManualClock {
        instant: Mutex<Instant>,
        system: Mutex<SystemTime>,
    }

    impl ManualClock {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                instant: Mutex::new(Instant::now()),
                system: Mutex::new(SystemTime::now()),
            })
        }

        pub fn advance(&self, by: Duration) {
            let mut i = self.instant.lock().unwrap_or_else(|e| e.into_inner());
            *i += by;
            let mut s = self.system.lock().unwrap_or_else(|e| e.into_inner());
            *s += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.instant.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn system_now(&self) -> SystemTime {
            *self.system.lock().unwrap_or_else(|e| e.into_inner())
        }
    }
}
