//! Hybrid logical clock for version allocation
//!
//! Versions pack wall-clock milliseconds and a 16 bit counter. The clock
//! hands out the current wall time when it has moved past the last issued
//! version and otherwise bumps the counter, so versions strictly increase
//! even when the system clock stalls or steps backwards.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tessera_core::Version;

/// Source of strictly increasing versions
#[derive(Debug, Default)]
pub struct VersionClock {
    last: AtomicU64,
}

impl VersionClock {
    /// Clock that has issued nothing yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the next version
    pub fn next(&self) -> Version {
        let wall = Version::new(wall_millis(), 0).as_u64();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = wall.max(last.saturating_add(1));
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Version::from_u64(candidate),
                Err(actual) => last = actual,
            }
        }
    }

    /// Merge a version issued elsewhere so later versions sort after it
    pub fn observe(&self, version: Version) {
        self.last.fetch_max(version.as_u64(), Ordering::AcqRel);
    }

    /// Last issued or observed version
    pub fn current(&self) -> Version {
        Version::from_u64(self.last.load(Ordering::Acquire))
    }
}

fn wall_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}
