// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Scoped acquisition of the substrate's signal-mask suspension.
//!
//! The alarm and I/O completion callbacks share the scheduler's data
//! structures with mainline code, so there is exactly one locking
//! discipline for all of it: every mutation of the ready queue, sleep
//! queue, thread table, mutex fields, or bounce-buffer pool happens with
//! signals suspended.
//!
//! [`Guarded<T>`] pairs the substrate's signal mask with a `spin::Mutex` so
//! the real critical section is enforced even for a `Substrate`
//! implementation (like `vmkit::testing::ThreadedSubstrate`) whose
//! callbacks genuinely arrive on a different OS thread. Attempting to
//! re-enter `Guarded::enter` while already inside it deadlocks immediately
//! on the inner spinlock rather than silently corrupting state — the
//! closest a non-nesting-counting mask can come to catching a nested
//! acquisition.

use crate::substrate::Substrate;
use spin::Mutex;

pub struct Guarded<T> {
    inner: Mutex<T>,
}

impl<T> Guarded<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Suspends signal delivery, runs `f` against the protected state, then
    /// resumes signal delivery before returning. `f` must not itself call
    /// [`Substrate::switch_context`] — the mask is released *before* the
    /// context switch so the incoming thread runs with signals enabled;
    /// callers perform the switch after `enter` returns, using the values
    /// it computed.
    pub fn enter<S, R>(&self, substrate: &S, f: impl FnOnce(&mut T) -> R) -> R
    where
        S: Substrate,
    {
        let token = substrate.suspend_signals();
        let result = {
            let mut guard = self.inner.lock();
            f(&mut guard)
        };
        substrate.resume_signals(token);
        result
    }
}
