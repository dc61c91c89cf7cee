use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant as HostInstant;

use core::time::Duration;
use px16_common::time::Clock;

/// Host monotonic clock for simulation runs.
#[derive(Clone)]
pub struct StdClock {
    origin: HostInstant,
}

impl StdClock {
    pub fn new() -> Self {
        StdClock {
            origin: HostInstant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        StdClock::new()
    }
}

impl Clock for StdClock {
    fn current_nanos(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Manually advanced clock for deterministic timeout tests. Clones
/// share the same timeline.
#[derive(Clone, Default)]
pub struct ManualClock {
    nanos: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        ManualClock::default()
    }

    pub fn advance(&self, d: Duration) {
        self.nanos.fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn current_nanos(&self) -> u64 {
        self.nanos.load(Ordering::SeqCst)
    }
}
