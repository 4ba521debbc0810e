// Copyright (c) Mysten Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::block::TimestampMs;

/// Wallclock source for item and proposal timestamps. Deadlines use the
/// tokio monotonic clock instead; this port only exists so tests can pin
/// wallclock time.
pub trait Clock: Send + Sync + 'static {
    fn now_ms(&self) -> TimestampMs;
}

/// The system wallclock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> TimestampMs {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Clock is set before the unix epoch")
            .as_millis() as TimestampMs
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Default)]
pub struct TestClock {
    now_ms: AtomicU64,
}

impl TestClock {
    pub fn new(now_ms: TimestampMs) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn advance_ms(&self, delta: TimestampMs) {
        self.now_ms.fetch_add(delta, Ordering::Relaxed);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> TimestampMs {
        self.now_ms.load(Ordering::Relaxed)
    }
}
