// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The tick clock: a monotonic counter advanced only by
//! the alarm handler, plus the configured tick period.

use crate::error::VmStatus;
use crate::types::Ticks;
use std::time::Duration;

pub struct TickClock {
    period: Duration,
    current: Ticks,
}

impl TickClock {
    pub fn new(period: Duration) -> Self {
        Self { period, current: 0 }
    }

    /// Configured tick period in milliseconds, as set at `Vm::start`.
    pub fn period_ms(&self) -> u64 {
        self.period.as_millis() as u64
    }

    pub fn current(&self) -> Ticks {
        self.current
    }

    /// Advances the counter by one tick. Called only by the alarm handler,
    /// under the signal guard.
    pub fn advance(&mut self) {
        self.current = self.current.wrapping_add(1);
    }
}

/// `tick_period_ms() -> ms` per `spec.md` §4.2. The `out` parameter models
/// the C signature's null-pointer check as an `Option`.
pub fn tick_period_ms(clock: &TickClock, out: Option<&mut u64>) -> VmStatus {
    match out {
        Some(slot) => {
            *slot = clock.period_ms();
            VmStatus::Success
        }
        None => VmStatus::InvalidParameter,
    }
}

/// `current_tick() -> ticks` per `spec.md` §4.2.
pub fn current_tick(clock: &TickClock, out: Option<&mut Ticks>) -> VmStatus {
    match out {
        Some(slot) => {
            *slot = clock.current();
            VmStatus::Success
        }
        None => VmStatus::InvalidParameter,
    }
}
