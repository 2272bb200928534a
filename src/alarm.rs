// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The periodic alarm handler, grounded on
//! `kernel/timer.rs`'s tick-interrupt handling: advance the clock, migrate
//! any sleeper whose deadline has passed onto the ready queue, then let the
//! scheduler decide whether the newly-woken set outranks whoever is
//! running.
//!
//! Also scans bounded `mutex_acquire` deadlines. These can't live on the
//! sleep queue alongside `thread_sleep`'s, because expiring one also has to
//! cancel the waiter's entry in the mutex's own wait heap — a generic
//! sleep-queue wakeup has no mutex to reach into.
//!
//! Kept in its own module, separate from [`crate::vm`]'s request/response
//! API methods, since it is the one piece of `Vm` driven by the substrate
//! rather than by application code calling in.

use std::sync::Arc;

use crate::substrate::Substrate;
use crate::types::SuspendReason;
use crate::vm::Vm;

impl<S: Substrate + 'static> Vm<S> {
    /// Installed once at `Vm::start` via `Substrate::request_alarm`. Runs on
    /// whatever execution context the substrate delivers the periodic
    /// callback on — in `vmkit::testing::ThreadedSubstrate`, a dedicated
    /// timer thread, never any application thread's own context, so the
    /// resulting switch (if any) is always a non-blocking handoff from the
    /// alarm thread's point of view.
    pub(crate) fn on_tick(self: &Arc<Self>) {
        let switch = self.state.enter(&self.substrate, |s| {
            s.clock.advance();
            let tick = s.clock.current();
            let woken = s.scheduler.drain_sleepers(tick);
            if !woken.is_empty() {
                log::trace!("alarm: tick={tick} woke {woken:?}");
            }

            let mut i = 0;
            while i < s.mutex_deadlines.len() {
                let (tid, mid, deadline) = s.mutex_deadlines[i];
                if tick < deadline {
                    i += 1;
                    continue;
                }
                s.mutex_deadlines.swap_remove(i);
                let still_waiting = s.mutexes.get_mut(mid).is_some_and(|m| m.cancel_wait(tid));
                if still_waiting {
                    log::debug!("alarm: mutex_acquire timeout mid={mid} tid={tid} tick={tick}");
                    let tcb = s.scheduler.threads.get_mut(tid).expect("mutex deadline for unknown thread");
                    tcb.wait_timed_out = true;
                    let priority = tcb.priority;
                    s.scheduler.mark_ready(tid, priority);
                }
            }

            s.scheduler.schedule(SuspendReason::Priority)
        });
        self.perform_switch_opt(switch);
    }
}
