// SPDX-License-Identifier: MIT OR Apache-2.0

//! Clock abstraction.
//!
//! Production code uses [`SystemClock`]; tests that exercise lease expiry,
//! token-bucket refill, or clock-skew checks swap in a [`ManualClock`] and
//! advance time explicitly.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

/// Source of UTC timestamps.
pub trait Clock: Send + Sync {
    /// Current instant in UTC.
    fn now(&self) -> DateTime<Utc>;
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// Wall-clock time via [`Utc::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Convenience constructor for the common case.
#[must_use]
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Manually-driven clock for tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Create a clock frozen at the given instant.
    #[must_use]
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    /// Advance the clock by a duration.
    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock lock poisoned");
        *guard += by;
    }

    /// Set the clock to an absolute instant.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}
