// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The scheduler core: priority selection and the lazy-skip rule, kept
//! free of any `Substrate` dependency so it can be unit-tested as a pure
//! state machine. [`crate::vm::Vm`] is the only caller; it turns this
//! module's [`Switch`] decisions into real `Substrate::switch_context`
//! calls.

use crate::ready_queue::ReadyQueue;
use crate::sleep_queue::SleepQueue;
use crate::thread::{ThreadState, ThreadTable};
use crate::types::{Priority, SuspendReason, ThreadId, Ticks, IDLE_THREAD};

/// A context switch the caller must now perform, naming which thread's
/// context to switch away from and which to switch into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Switch {
    pub from: ThreadId,
    pub to: ThreadId,
}

/// Owns the thread table and both priority queues, and implements the
/// single internal operation, `schedule(reason)`.
pub struct Scheduler {
    pub threads: ThreadTable,
    ready: ReadyQueue,
    sleep: SleepQueue,
    running: ThreadId,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            threads: ThreadTable::new(),
            ready: ReadyQueue::new(),
            sleep: SleepQueue::new(),
            running: IDLE_THREAD,
        }
    }

    pub fn running(&self) -> ThreadId {
        self.running
    }

    /// Drains the ready queue's Dead entries at the top — the *only* place
    /// Dead entries leave the ready queue.
    fn peek_live_ready(&mut self) -> Option<ThreadId> {
        loop {
            let tid = self.ready.peek()?;
            match self.threads.get(tid).map(|t| t.state) {
                Some(ThreadState::Ready) => return Some(tid),
                _ => {
                    self.ready.pop();
                }
            }
        }
    }

    fn pop_live_ready(&mut self) -> ThreadId {
        loop {
            let tid = self
                .ready
                .pop()
                .expect("ready queue exhausted: the idle thread must always be present");
            if matches!(self.threads.get(tid).map(|t| t.state), Some(ThreadState::Ready)) {
                return tid;
            }
        }
    }

    /// Pushes `tid` onto the ready queue with state `Ready`. Used for
    /// activation, sleep wakeup, mutex/semaphore release, and I/O
    /// completion — everywhere a thread becomes runnable again.
    pub fn mark_ready(&mut self, tid: ThreadId, priority: Priority) {
        self.threads.get_mut(tid).expect("mark_ready: unknown tid").state = ThreadState::Ready;
        self.ready.push(tid, priority);
    }

    /// Parks `tid` on the sleep queue until `wake_tick`. Does not touch the ready queue.
    pub fn mark_sleeping(&mut self, tid: ThreadId, wake_tick: Ticks) {
        let tcb = self.threads.get_mut(tid).expect("mark_sleeping: unknown tid");
        tcb.state = ThreadState::Waiting;
        tcb.wake_tick = wake_tick;
        self.sleep.push(tid, wake_tick);
    }

    /// Evicts `tid` from the sleep queue if it is parked there. Used by
    /// `thread_terminate` so a terminated sleeper is never resurrected by a
    /// later `drain_sleepers` call.
    pub fn sleep_queue_remove(&mut self, tid: ThreadId) -> bool {
        self.sleep.remove(tid)
    }

    /// Marks `tid` `Waiting` without enqueuing it anywhere here — the
    /// caller has already enrolled it in a mutex/semaphore waiter heap or
    /// an I/O-completion closure.
    pub fn mark_waiting(&mut self, tid: ThreadId) {
        self.threads.get_mut(tid).expect("mark_waiting: unknown tid").state = ThreadState::Waiting;
    }

    pub fn mark_dead(&mut self, tid: ThreadId) {
        self.threads.get_mut(tid).expect("mark_dead: unknown tid").state = ThreadState::Dead;
    }

    /// Migrates every sleeper whose `wake_tick` has passed onto the ready
    /// queue, looping rather than handling one wakeup per call so catch-up
    /// after a late tick still wakes everyone due.
    /// Returns the tids moved, for logging.
    pub fn drain_sleepers(&mut self, current_tick: Ticks) -> Vec<ThreadId> {
        let mut woken = Vec::new();
        while let Some(wake_tick) = self.sleep.peek_wake_tick() {
            if wake_tick > current_tick {
                break;
            }
            let tid = self.sleep.pop().expect("peeked wake_tick implies a pop succeeds");
            let priority = self.threads.get(tid).expect("sleeper tid vanished from table").priority;
            self.mark_ready(tid, priority);
            woken.push(tid);
        }
        woken
    }

    /// The scheduler core's single internal operation.
    /// Assumes the caller has already performed whatever state mutation
    /// `reason` implies (enqueuing on the sleep queue, a waiter heap, or
    /// marking `Dead`) *before* calling this.
    pub fn schedule(&mut self, reason: SuspendReason) -> Option<Switch> {
        let current = self.running;
        match reason {
            SuspendReason::Priority => {
                let top = self.peek_live_ready()?;
                let top_priority = self.threads.get(top).expect("ready entry vanished").priority;
                let current_priority = self
                    .threads
                    .get(current)
                    .map(|t| t.priority)
                    .unwrap_or(Priority::IDLE);
                if top_priority <= current_priority {
                    return None;
                }
                self.mark_ready(current, current_priority);
                let to = self.pop_live_ready();
                debug_assert_eq!(to, top);
                self.threads.get_mut(to).expect("picked tid vanished").state = ThreadState::Running;
                self.running = to;
                Some(Switch { from: current, to })
            }
            SuspendReason::Sleep | SuspendReason::IoWait | SuspendReason::MutexWait => {
                let to = self.pop_live_ready();
                self.threads.get_mut(to).expect("picked tid vanished").state = ThreadState::Running;
                self.running = to;
                Some(Switch { from: current, to })
            }
            SuspendReason::Terminated => {
                let to = self.pop_live_ready();
                self.threads.get_mut(to).expect("picked tid vanished").state = ThreadState::Running;
                self.running = to;
                Some(Switch { from: current, to })
            }
        }
    }

    /// Bootstraps the very first dispatch at `Vm::start`: idle and
    /// module-main are both `Ready`; this just picks the highest-priority
    /// one (always module-main, since it outranks idle) without going
    /// through `schedule`'s "is a switch warranted" comparison, since
    /// there is no meaningfully "running" thread yet to compare against.
    pub fn bootstrap(&mut self) -> ThreadId {
        let to = self.pop_live_ready();
        self.threads.get_mut(to).expect("bootstrap: no ready thread").state = ThreadState::Running;
        self.running = to;
        to
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IDLE_THREAD, MAIN_THREAD};

    fn new_with_idle_and_main_ready() -> Scheduler {
        let mut s = Scheduler::new();
        s.mark_ready(IDLE_THREAD, Priority::IDLE);
        s.mark_ready(MAIN_THREAD, Priority::NORMAL);
        s
    }

    #[test]
    fn bootstrap_picks_main_over_idle() {
        let mut s = new_with_idle_and_main_ready();
        assert_eq!(s.bootstrap(), MAIN_THREAD);
        assert_eq!(s.running(), MAIN_THREAD);
    }

    #[test]
    fn priority_reason_is_a_noop_when_nothing_outranks_the_runner() {
        let mut s = new_with_idle_and_main_ready();
        s.bootstrap();
        // Only idle is left on the ready queue, and idle never outranks
        // module-main.
        assert_eq!(s.schedule(SuspendReason::Priority), None);
    }

    #[test]
    fn priority_reason_switches_to_a_higher_priority_ready_thread() {
        let mut s = new_with_idle_and_main_ready();
        s.bootstrap(); // running = MAIN_THREAD (Normal)
        let high = s.threads.allocate(Priority::HIGH, 4096);
        s.mark_ready(high, Priority::HIGH);
        let switch = s.schedule(SuspendReason::Priority).expect("high outranks normal");
        assert_eq!(switch, Switch { from: MAIN_THREAD, to: high });
        assert_eq!(s.running(), high);
        // The preempted thread went back onto the ready queue as Ready.
        assert_eq!(s.threads.get(MAIN_THREAD).unwrap().state, ThreadState::Ready);
    }

    #[test]
    fn sleep_reason_always_switches_to_the_live_ready_top() {
        let mut s = new_with_idle_and_main_ready();
        s.bootstrap();
        s.mark_sleeping(MAIN_THREAD, 10);
        let switch = s.schedule(SuspendReason::Sleep).unwrap();
        assert_eq!(switch, Switch { from: MAIN_THREAD, to: IDLE_THREAD });
        assert_eq!(s.running(), IDLE_THREAD);
    }

    #[test]
    fn drain_sleepers_wakes_everyone_due_in_one_catch_up_call() {
        let mut s = Scheduler::new();
        let a = s.threads.allocate(Priority::NORMAL, 4096);
        let b = s.threads.allocate(Priority::NORMAL, 4096);
        s.mark_sleeping(a, 5);
        s.mark_sleeping(b, 5);
        let woken = s.drain_sleepers(7);
        assert_eq!(woken.len(), 2);
        assert!(woken.contains(&a) && woken.contains(&b));
    }

    #[test]
    fn drain_sleepers_leaves_not_yet_due_sleepers_alone() {
        let mut s = Scheduler::new();
        let a = s.threads.allocate(Priority::NORMAL, 4096);
        s.mark_sleeping(a, 20);
        assert!(s.drain_sleepers(10).is_empty());
    }

    #[test]
    fn dead_thread_at_ready_top_is_lazily_skipped_not_scheduled() {
        let mut s = new_with_idle_and_main_ready();
        s.bootstrap(); // running = MAIN_THREAD
        let a = s.threads.allocate(Priority::NORMAL, 4096);
        let b = s.threads.allocate(Priority::NORMAL, 4096);
        s.mark_ready(a, Priority::NORMAL);
        s.mark_ready(b, Priority::NORMAL);
        // a terminates before ever running; it must never be switched into.
        s.mark_dead(a);
        s.mark_sleeping(MAIN_THREAD, 1); // force a switch off of MAIN_THREAD
        let switch = s.schedule(SuspendReason::Sleep).unwrap();
        assert_eq!(switch.to, b);
        assert_ne!(switch.to, a);
    }

    #[test]
    fn terminated_reason_performs_a_one_way_switch() {
        let mut s = new_with_idle_and_main_ready();
        s.bootstrap();
        s.mark_dead(MAIN_THREAD);
        let switch = s.schedule(SuspendReason::Terminated).unwrap();
        assert_eq!(switch, Switch { from: MAIN_THREAD, to: IDLE_THREAD });
    }
}
