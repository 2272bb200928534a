// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Priority-ordered mutexes.
//!
//! A mutex has no priority inheritance: an owner holding the lock against a
//! higher-priority waiter simply keeps running until it releases, exactly as
//! invariants describe. What *is* priority-ordered is who gets
//! the lock next at release time — the waiter heap, not the ready queue,
//! decides that.
//!
//! This module owns only the mutex's own state (owner, waiter heap). The
//! scheduling consequences of a failed acquire or of a release — suspending
//! the caller, registering a timeout on the sleep queue, waking the next
//! owner onto the ready queue — are [`crate::vm::Vm`]'s job, since they
//! require the thread table and both queues at once.

use crate::types::{Priority, ThreadId};
use crate::wait_queue::PriorityWaitHeap;

pub struct VmMutex {
    owner: Option<ThreadId>,
    waiters: PriorityWaitHeap,
}

/// Outcome of [`VmMutex::try_acquire`].
pub enum AcquireOutcome {
    /// The mutex was free and `tid` now owns it.
    Acquired,
    /// The mutex is held by someone else; the caller has been enqueued on
    /// the waiter heap and must suspend.
    MustWait,
}

impl VmMutex {
    pub fn new() -> Self {
        Self {
            owner: None,
            waiters: PriorityWaitHeap::new(),
        }
    }

    pub fn owner(&self) -> Option<ThreadId> {
        self.owner
    }

    pub fn has_waiters(&self) -> bool {
        !self.waiters.is_empty()
    }

    /// Attempts to take the lock for `tid`. On contention, enqueues `tid` at
    /// `priority` and returns [`AcquireOutcome::MustWait`] — the caller is
    /// responsible for suspending the thread afterwards. Non-recursive: a
    /// thread that already owns the mutex and calls this again is enqueued
    /// behind itself and deadlocks, same as any other non-recursive lock.
    pub fn try_acquire(&mut self, tid: ThreadId, priority: Priority) -> AcquireOutcome {
        match self.owner {
            None => {
                self.owner = Some(tid);
                AcquireOutcome::Acquired
            }
            Some(_) => {
                self.waiters.push(tid, priority);
                AcquireOutcome::MustWait
            }
        }
    }

    /// Cancels a pending wait, used when a bounded `mutex_acquire` times out
    /// before the lock was ever handed to it. Returns whether `tid` was
    /// still actually waiting (it may have already been woken by a release
    /// that raced the timeout).
    pub fn cancel_wait(&mut self, tid: ThreadId) -> bool {
        self.waiters.remove(tid)
    }

    /// Releases the lock held by `tid`. Returns the next owner to wake, if
    /// any waiter was queued. Returns `None` with no state change if `tid`
    /// did not hold the lock — callers must check ownership themselves
    /// before calling this.
    pub fn release(&mut self, tid: ThreadId) -> Option<ThreadId> {
        if self.owner != Some(tid) {
            return None;
        }
        let next = self.waiters.pop_highest();
        self.owner = next;
        next
    }
}

/// Dense registry of mutexes, mirroring [`crate::thread::ThreadTable`]'s
/// slot-reuse-free allocation scheme.
pub struct MutexTable {
    mutexes: Vec<Option<VmMutex>>,
    next_id: u64,
}

impl MutexTable {
    pub fn new() -> Self {
        Self {
            mutexes: Vec::new(),
            next_id: 0,
        }
    }

    pub fn create(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.mutexes.push(Some(VmMutex::new()));
        id
    }

    pub fn get(&self, id: u64) -> Option<&VmMutex> {
        self.mutexes.get(id as usize).and_then(|slot| slot.as_ref())
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut VmMutex> {
        self.mutexes.get_mut(id as usize).and_then(|slot| slot.as_mut())
    }

    /// Removes a mutex entirely. Caller must have already checked it has no
    /// owner and no waiters.
    pub fn remove(&mut self, id: u64) {
        if let Some(slot) = self.mutexes.get_mut(id as usize) {
            *slot = None;
        }
    }

    /// Cancels `tid`'s pending wait on whichever mutex it is queued on, if
    /// any. A thread waits on at most one mutex at a time, so this scans
    /// every table entry rather than requiring the caller to know which —
    /// used when a waiter is terminated out from under its wait.
    pub fn cancel_wait_everywhere(&mut self, tid: ThreadId) -> bool {
        self.mutexes
            .iter_mut()
            .flatten()
            .any(|mutex| mutex.cancel_wait(tid))
    }
}
