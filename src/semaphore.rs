// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Counting semaphores, built atop the same waiter heap as the mutex
//! (`SPEC_FULL.md` §9a).
//!
//! `original_source/apps/copyfile2.c`'s `empty`/`full` semaphores guard a
//! shared ring buffer between a producer and a consumer thread with a
//! hand-rolled `Down`/`Up` pair: a mutex-protected counter plus a manually
//! linked wait-node list, spun on with `VMThreadSleep(VM_TIMEOUT_IMMEDIATE)`
//! while waiting. `vmkit` keeps the shape — a counter plus a parked-waiter
//! set guarded by the same signal discipline as everything else — but
//! replaces the busy-spin with the same suspend/wake path the mutex already
//! has, and orders waiters by priority instead of by arrival.
//!
//! As with [`crate::mutex`], this module owns only the semaphore's own
//! state; suspending and waking threads is [`crate::vm::Vm`]'s job.

use crate::types::{Priority, ThreadId};
use crate::wait_queue::PriorityWaitHeap;

pub struct Semaphore {
    count: u32,
    waiters: PriorityWaitHeap,
}

/// Outcome of [`Semaphore::wait`].
pub enum WaitOutcome {
    /// A slot was available; the count was decremented immediately.
    Acquired,
    /// No slot was available; the caller has been enqueued and must
    /// suspend.
    MustWait,
}

impl Semaphore {
    pub fn new(initial: u32) -> Self {
        Self {
            count: initial,
            waiters: PriorityWaitHeap::new(),
        }
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    /// `Down`/`wait()`: takes a slot if one is free, otherwise enqueues
    /// `tid` at `priority`.
    pub fn wait(&mut self, tid: ThreadId, priority: Priority) -> WaitOutcome {
        if self.count > 0 {
            self.count -= 1;
            WaitOutcome::Acquired
        } else {
            self.waiters.push(tid, priority);
            WaitOutcome::MustWait
        }
    }

    /// Cancels a pending wait (mirrors [`crate::mutex::VmMutex::cancel_wait`]
    /// — semaphores don't currently expose a bounded `wait`, but the
    /// primitive is kept symmetric with the mutex for when one is added).
    pub fn cancel_wait(&mut self, tid: ThreadId) -> bool {
        self.waiters.remove(tid)
    }

    /// `Up`/`signal()`: hands the freed slot directly to the
    /// highest-priority waiter if one exists, otherwise increments the
    /// count. Returns the thread to wake, if any.
    pub fn signal(&mut self) -> Option<ThreadId> {
        match self.waiters.pop_highest() {
            Some(tid) => Some(tid),
            None => {
                self.count += 1;
                None
            }
        }
    }
}

/// Dense registry of semaphores, mirroring [`crate::mutex::MutexTable`].
pub struct SemaphoreTable {
    semaphores: Vec<Option<Semaphore>>,
    next_id: u64,
}

impl SemaphoreTable {
    pub fn new() -> Self {
        Self {
            semaphores: Vec::new(),
            next_id: 0,
        }
    }

    pub fn create(&mut self, initial: u32) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.semaphores.push(Some(Semaphore::new(initial)));
        id
    }

    pub fn get(&self, id: u64) -> Option<&Semaphore> {
        self.semaphores.get(id as usize).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Semaphore> {
        self.semaphores.get_mut(id as usize).and_then(|slot| slot.as_mut())
    }

    pub fn remove(&mut self, id: u64) {
        if let Some(slot) = self.semaphores.get_mut(id as usize) {
            *slot = None;
        }
    }

    /// Cancels `tid`'s pending wait on whichever semaphore it is queued on,
    /// if any — mirrors [`crate::mutex::MutexTable::cancel_wait_everywhere`].
    pub fn cancel_wait_everywhere(&mut self, tid: ThreadId) -> bool {
        self.semaphores
            .iter_mut()
            .flatten()
            .any(|sem| sem.cancel_wait(tid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_drains_initial_count_before_blocking() {
        let mut s = Semaphore::new(2);
        assert!(matches!(s.wait(1, Priority::NORMAL), WaitOutcome::Acquired));
        assert!(matches!(s.wait(2, Priority::NORMAL), WaitOutcome::Acquired));
        assert!(matches!(s.wait(3, Priority::NORMAL), WaitOutcome::MustWait));
        assert_eq!(s.count(), 0);
    }

    #[test]
    fn signal_hands_off_to_highest_priority_waiter_first() {
        let mut s = Semaphore::new(0);
        s.wait(1, Priority::LOW);
        s.wait(2, Priority::HIGH);
        assert_eq!(s.signal(), Some(2));
        assert_eq!(s.signal(), Some(1));
        // No more waiters: this signal just restores the count.
        assert_eq!(s.signal(), None);
        assert_eq!(s.count(), 1);
    }

    #[test]
    fn producer_consumer_style_empty_full_pair_stays_bounded() {
        // Mirrors copyfile2.c's `Empty`/`Full` pair guarding a single-slot
        // queue: producer waits on Empty, signals Full; consumer waits on
        // Full, signals Empty.
        let mut empty = Semaphore::new(1);
        let mut full = Semaphore::new(0);

        assert!(matches!(empty.wait(10, Priority::NORMAL), WaitOutcome::Acquired));
        assert_eq!(full.signal(), None);
        assert_eq!(full.count(), 1);

        assert!(matches!(full.wait(11, Priority::NORMAL), WaitOutcome::Acquired));
        assert_eq!(empty.signal(), None);
        assert_eq!(empty.count(), 1);
    }

    #[test]
    fn cancel_wait_everywhere_finds_the_right_table_entry() {
        let mut table = SemaphoreTable::new();
        let a = table.create(0);
        let b = table.create(0);
        table.get_mut(a).unwrap().wait(1, Priority::NORMAL);
        table.get_mut(b).unwrap().wait(2, Priority::NORMAL);

        assert!(table.cancel_wait_everywhere(2));
        assert!(!table.cancel_wait_everywhere(2));
        assert_eq!(table.get_mut(b).unwrap().signal(), None);
        assert_eq!(table.get_mut(a).unwrap().signal(), Some(1));
    }
}
