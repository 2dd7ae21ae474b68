// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wall-clock abstraction so audits and session records can be timestamped
//! deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Supplies the current time as epoch milliseconds.
///
/// Every place in the executor that stamps an [`crate::audit::ExecutionAudit`]
/// or a session record takes `&impl Clock` rather than calling
/// `SystemTime::now()` directly, so tests can freeze or advance time.
pub trait Clock: Send + Sync {
    fn epoch_ms(&self) -> u64;
}

/// Production clock backed by the system wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Deterministic clock for tests. Starts at a fixed epoch and advances only
/// when told to.
#[derive(Debug, Clone)]
pub struct FakeClock {
    now_ms: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance the clock and return the new value.
    pub fn advance(&self, ms: u64) -> u64 {
        self.now_ms.fetch_add(ms, Ordering::SeqCst) + ms
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(1_000_000)
    }
}

impl Clock for FakeClock {
    fn epoch_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fake_clock_advances() {
        let clock = FakeClock::new(100);
        assert_eq!(clock.epoch_ms(), 100);
        assert_eq!(clock.advance(50), 150);
        assert_eq!(clock.epoch_ms(), 150);
    }

    #[test]
    fn fake_clock_set() {
        let clock = FakeClock::new(0);
        clock.set(999);
        assert_eq!(clock.epoch_ms(), 999);
    }

    #[test]
    fn system_clock_is_nonzero() {
        let clock = SystemClock;
        assert!(clock.epoch_ms() > 0);
    }
}
