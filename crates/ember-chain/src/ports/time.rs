//! Time port, for testability of timestamp rules.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait TimeSource: Send + Sync {
    /// Seconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Controllable clock for tests.
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    secs: AtomicU64,
}

impl FixedTimeSource {
    pub fn new(secs: u64) -> Self {
        Self { secs: AtomicU64::new(secs) }
    }

    pub fn set(&self, secs: u64) {
        self.secs.store(secs, Ordering::Relaxed);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> u64 {
        self.secs.load(Ordering::Relaxed)
    }
}
