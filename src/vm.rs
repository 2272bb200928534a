// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The public API surface and `Vm::start` bootstrap.
//!
//! [`Vm<S>`] is the single critical-section owner: every mutation of the
//! ready queue, sleep queue, thread table, mutex/semaphore tables, and
//! bounce-buffer pool happens inside [`Guarded::enter`], and every context
//! switch happens *after* that closure returns, with the signal mask
//! already released, so a thread that blocks mid-switch never does so
//! while signals are suspended.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::bounce_pool::BouncePool;
use crate::error::VmStatus;
use crate::mutex::{AcquireOutcome, MutexTable};
use crate::scheduler::{Scheduler, Switch};
use crate::semaphore::{SemaphoreTable, WaitOutcome};
use crate::signal_guard::Guarded;
use crate::substrate::{ContextId, Substrate};
use crate::thread::EntryFn;
use crate::tick::TickClock;
use crate::types::{
    MutexId, Priority, SemaphoreId, ThreadId, Ticks, IDLE_THREAD, IMMEDIATE, INFINITE, INVALID_THREAD,
    MAIN_THREAD, SuspendReason,
};

/// Construction-time configuration, exactly `start(tick_ms, shared_size,
/// argc, argv)` minus the argument vector (out of scope — the launcher
/// passes `argc`/`argv` through to the loaded module's entry, not to the
/// VM core itself).
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    pub tick_period: Duration,
    pub shared_bytes: usize,
    /// Stack size given to the module-main thread. Per-thread stack sizes
    /// for application-created threads are set individually at
    /// `thread_create`.
    pub main_stack_size: usize,
}

impl Default for VmConfig {
    /// Mirrors `original_source/src/main.c`'s defaults: 100ms ticks, a
    /// 0x4000-byte shared region.
    fn default() -> Self {
        Self {
            tick_period: Duration::from_millis(100),
            shared_bytes: 0x4000,
            main_stack_size: 1 << 20,
        }
    }
}

/// All scheduler-adjacent state, protected as one critical section by
/// [`Guarded`]. Grouping these together (rather than one `Guarded` per
/// field) is deliberate: shared-resource policy treats the
/// ready queue, sleep queue, thread table, mutex fields, and pool as a
/// single interlocking critical section, and several operations (mutex
/// release picking a ready-queue entry, I/O completion touching both the
/// pool and the thread table) span more than one of them atomically.
pub(crate) struct VmState {
    pub scheduler: Scheduler,
    pub mutexes: MutexTable,
    pub semaphores: SemaphoreTable,
    pub pool: BouncePool,
    pub clock: TickClock,
    /// Completed read/write transfers, keyed by the parked thread, read
    /// back by [`crate::file_io`] after the thread resumes. Not part of
    /// the thread control block because it is sized per transfer, not
    /// fixed — see `SPEC_FULL.md`'s module table entry for `file_io`.
    pub pending_transfers: HashMap<ThreadId, (Vec<u8>, i64)>,
    /// Pending bounded `mutex_acquire` deadlines, scanned by the alarm
    /// handler alongside the sleep queue. Kept separate from the sleep
    /// queue itself since a mutex-wait deadline firing must also cancel
    /// the waiter's entry in the mutex's own wait heap, which a generic
    /// sleep-queue wakeup has no way to do.
    pub mutex_deadlines: Vec<(ThreadId, MutexId, Ticks)>,
}

/// The VM itself. `Substrate::spawn_context` and the blocking/non-blocking
/// handoff inside `Substrate::switch_context` are entirely the substrate
/// implementation's concern — `Vm` only ever calls `schedule` and then
/// `switch_context` with the result.
pub struct Vm<S: Substrate> {
    pub(crate) substrate: S,
    pub(crate) state: Guarded<VmState>,
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
}

/// Handle application code uses to call back into the VM. Threads other
/// than module-main receive one by capturing a clone in their entry
/// closure, matching how `std::thread::spawn` closures capture what they
/// need rather than being handed an implicit context argument.
pub type VmHandle<S> = Arc<Vm<S>>;

impl<S: Substrate + 'static> Vm<S> {
    /// `start(tick_ms, shared_size, argc, argv)`. Carves the
    /// bounce-buffer pool out of the substrate's shared region, creates
    /// the idle and module-main threads, installs the tick alarm, and
    /// then blocks the calling thread until `entry` (running as
    /// module-main) terminates — mirroring the original `VMStart`'s
    /// blocking contract (`SPEC_FULL.md` §4.3a).
    pub fn start(config: VmConfig, substrate: S, entry: impl FnOnce(&VmHandle<S>) + Send + 'static) -> VmStatus {
        let region = match substrate.initialize(config.shared_bytes) {
            Ok(region) => region,
            Err(err) => {
                log::warn!("vm: substrate failed to provide shared memory: {err}");
                return VmStatus::Failure;
            }
        };
        let pool = BouncePool::new(region);
        let state = VmState {
            scheduler: Scheduler::new(),
            mutexes: MutexTable::new(),
            semaphores: SemaphoreTable::new(),
            pool,
            clock: TickClock::new(config.tick_period),
            pending_transfers: HashMap::new(),
            mutex_deadlines: Vec::new(),
        };
        let vm = Arc::new(Vm {
            substrate,
            state: Guarded::new(state),
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
        });

        let idle_vm = Arc::clone(&vm);
        let idle_ctx = vm
            .substrate
            .spawn_context(0, Box::new(move || idle_loop(idle_vm)));
        vm.state.enter(&vm.substrate, |s| {
            s.scheduler.threads.get_mut(IDLE_THREAD).expect("idle tcb missing").context = Some(idle_ctx);
            s.scheduler.mark_ready(IDLE_THREAD, Priority::IDLE);
        });

        let main_vm = Arc::clone(&vm);
        let wrapper: EntryFn = Box::new(move || {
            let handle = Arc::clone(&main_vm);
            entry(&handle);
            main_vm.thread_terminate(MAIN_THREAD);
        });
        let main_ctx = vm.substrate.spawn_context(config.main_stack_size, wrapper);
        vm.state.enter(&vm.substrate, |s| {
            s.scheduler.threads.get_mut(MAIN_THREAD).expect("main tcb missing").context = Some(main_ctx);
            s.scheduler.mark_ready(MAIN_THREAD, Priority::NORMAL);
        });

        vm.substrate.enable_signals();
        let alarm_vm = Arc::clone(&vm);
        vm.substrate
            .request_alarm(config.tick_period, Box::new(move || alarm_vm.on_tick()));

        log::info!("vm: starting, tick_period={:?}", config.tick_period);
        let to = vm.state.enter(&vm.substrate, |s| s.scheduler.bootstrap());
        let to_ctx = vm
            .state
            .enter(&vm.substrate, |s| s.scheduler.threads.get(to).unwrap().context.unwrap());
        vm.substrate.switch_context(idle_ctx, to_ctx);

        let mut done = vm.shutdown.lock().unwrap();
        while !*done {
            done = vm.shutdown_cv.wait(done).unwrap();
        }
        drop(done);
        vm.substrate.terminate();
        log::info!("vm: shut down");
        VmStatus::Success
    }

    /// Resolves a switch decision's thread ids to substrate context ids
    /// and performs the real handoff. Safe to call from any OS thread —
    /// whether the switch actually blocks the caller is
    /// `Substrate::switch_context`'s decision, based on whether the
    /// caller *is* `from`'s own execution context.
    pub(crate) fn perform_switch(&self, switch: Switch) {
        let (from_ctx, to_ctx) = self.state.enter(&self.substrate, |s| {
            let from_ctx = s.scheduler.threads.get(switch.from).and_then(|t| t.context);
            let to_ctx = s
                .scheduler
                .threads
                .get(switch.to)
                .and_then(|t| t.context)
                .expect("switch target has no context");
            (from_ctx, to_ctx)
        });
        // `from` may be absent if the outgoing thread was just deleted out
        // from under a stale handle; that never happens on the Terminated
        // path (the TCB is kept until `thread_delete`), so this is only
        // reachable via a programming error upstream.
        let from_ctx = from_ctx.unwrap_or(to_ctx);
        self.substrate.switch_context(from_ctx, to_ctx);
    }

    pub(crate) fn perform_switch_opt(&self, switch: Option<Switch>) {
        if let Some(switch) = switch {
            self.perform_switch(switch);
        }
    }

    fn priority_of(&self, tid: ThreadId) -> Priority {
        self.state
            .enter(&self.substrate, |s| s.scheduler.threads.get(tid).map(|t| t.priority))
            .unwrap_or(Priority::IDLE)
    }

    // ---- Tick clock  ----

    pub fn tick_period_ms(&self, out: Option<&mut u64>) -> VmStatus {
        self.state.enter(&self.substrate, |s| crate::tick::tick_period_ms(&s.clock, out))
    }

    pub fn current_tick(&self, out: Option<&mut Ticks>) -> VmStatus {
        self.state.enter(&self.substrate, |s| crate::tick::current_tick(&s.clock, out))
    }

    // ---- Thread table, creation and lifecycle  ----

    pub fn thread_create(
        &self,
        entry: impl FnOnce() + Send + 'static,
        stack_size: usize,
        priority: Priority,
        out: Option<&mut ThreadId>,
    ) -> VmStatus {
        let Some(out) = out else {
            return VmStatus::InvalidParameter;
        };
        let tid = self.state.enter(&self.substrate, |s| {
            let tid = s.scheduler.threads.allocate(priority, stack_size);
            s.scheduler.threads.get_mut(tid).unwrap().entry = Some(Box::new(entry));
            tid
        });
        log::debug!("thread_create: tid={tid} priority={priority:?} stack_size={stack_size}");
        *out = tid;
        VmStatus::Success
    }

    pub fn thread_activate(self: &Arc<Self>, tid: ThreadId) -> VmStatus {
        enum Outcome {
            Ok { entry: EntryFn, stack_size: usize, priority: Priority },
            InvalidId,
            InvalidState,
        }
        let outcome = self.state.enter(&self.substrate, |s| {
            let Some(tcb) = s.scheduler.threads.get_mut(tid) else {
                return Outcome::InvalidId;
            };
            if tcb.state != crate::thread::ThreadState::Dead {
                return Outcome::InvalidState;
            }
            let Some(entry) = tcb.entry.take() else {
                return Outcome::InvalidState;
            };
            Outcome::Ok {
                entry,
                stack_size: tcb.stack_size,
                priority: tcb.priority,
            }
        });
        let (entry, stack_size, priority) = match outcome {
            Outcome::InvalidId => return VmStatus::InvalidId,
            Outcome::InvalidState => return VmStatus::InvalidState,
            Outcome::Ok { entry, stack_size, priority } => (entry, stack_size, priority),
        };

        let vm = Arc::clone(self);
        let wrapper: EntryFn = Box::new(move || {
            entry();
            vm.thread_terminate(tid);
        });
        let ctx = self.substrate.spawn_context(stack_size, wrapper);

        let switch = self.state.enter(&self.substrate, |s| {
            s.scheduler.threads.get_mut(tid).unwrap().context = Some(ctx);
            s.scheduler.mark_ready(tid, priority);
            s.scheduler.schedule(SuspendReason::Priority)
        });
        log::debug!("thread_activate: tid={tid}");
        self.perform_switch_opt(switch);
        VmStatus::Success
    }

    /// `thread_terminate(tid)`. If `tid` is the current runner, performs
    /// the one-way switch described in `spec.md` §4.4's Terminated
    /// transition and never returns to the caller on that path (the
    /// calling OS thread is the terminated thread's own context, which
    /// the substrate never resumes).
    ///
    /// A thread that is `Waiting` may be parked on the sleep queue, a
    /// mutex/semaphore waiter heap, or have a pending `mutex_deadlines`
    /// entry — terminating it must evict it from all of those before
    /// marking it `Dead`, or a later `drain_sleepers`/`mutex_release`/
    /// `semaphore_signal` would resurrect a dead thread by calling
    /// `mark_ready` on it (`spec.md` §3: once `Dead`, a thread never
    /// re-enters any other state, and is on no queue).
    pub fn thread_terminate(self: &Arc<Self>, tid: ThreadId) -> VmStatus {
        enum Outcome {
            InvalidId,
            InvalidState,
            Self_(Option<Switch>),
            Other,
        }
        let outcome = self.state.enter(&self.substrate, |s| {
            let Some(tcb) = s.scheduler.threads.get(tid) else {
                return Outcome::InvalidId;
            };
            if tcb.state == crate::thread::ThreadState::Dead {
                return Outcome::InvalidState;
            }
            let is_runner = s.scheduler.running() == tid;
            s.scheduler.sleep_queue_remove(tid);
            s.mutexes.cancel_wait_everywhere(tid);
            s.semaphores.cancel_wait_everywhere(tid);
            s.mutex_deadlines.retain(|&(deadline_tid, _, _)| deadline_tid != tid);
            s.scheduler.mark_dead(tid);
            if is_runner {
                Outcome::Self_(s.scheduler.schedule(SuspendReason::Terminated))
            } else {
                Outcome::Other
            }
        });
        // `Vm::start` blocks on this condvar until module-main actually
        // terminates — that's the crate's entire shutdown signal. Fire it
        // for either successful-termination outcome, but not for the
        // invalid-id/invalid-state paths below, which didn't terminate
        // anything.
        if tid == MAIN_THREAD && !matches!(outcome, Outcome::InvalidId | Outcome::InvalidState) {
            *self.shutdown.lock().unwrap() = true;
            self.shutdown_cv.notify_all();
        }
        match outcome {
            Outcome::InvalidId => VmStatus::InvalidId,
            Outcome::InvalidState => VmStatus::InvalidState,
            Outcome::Other => {
                log::debug!("thread_terminate: tid={tid} (not runner)");
                VmStatus::Success
            }
            Outcome::Self_(switch) => {
                log::debug!("thread_terminate: tid={tid} (self, one-way switch)");
                self.perform_switch_opt(switch);
                // Unreachable in practice: the substrate never resumes a
                // terminated context. Kept for the type signature's sake.
                VmStatus::Success
            }
        }
    }

    pub fn thread_delete(&self, tid: ThreadId) -> VmStatus {
        self.state.enter(&self.substrate, |s| {
            let Some(tcb) = s.scheduler.threads.get(tid) else {
                return VmStatus::InvalidId;
            };
            if tcb.state != crate::thread::ThreadState::Dead {
                return VmStatus::InvalidState;
            }
            s.scheduler.threads.remove(tid);
            VmStatus::Success
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.state.enter(&self.substrate, |s| s.scheduler.running())
    }

    pub fn thread_state(&self, tid: ThreadId, out: Option<&mut crate::thread::ThreadState>) -> VmStatus {
        let Some(out) = out else {
            return VmStatus::InvalidParameter;
        };
        self.state.enter(&self.substrate, |s| match s.scheduler.threads.get(tid) {
            Some(tcb) => {
                *out = tcb.state;
                VmStatus::Success
            }
            None => VmStatus::InvalidId,
        })
    }

    /// `thread_sleep(ticks)`.
    pub fn thread_sleep(self: &Arc<Self>, ticks: Ticks) -> VmStatus {
        if ticks == INFINITE {
            return VmStatus::InvalidParameter;
        }
        let tid = self.thread_id();
        if ticks == IMMEDIATE {
            let switch = self.state.enter(&self.substrate, |s| s.scheduler.schedule(SuspendReason::Priority));
            self.perform_switch_opt(switch);
            return VmStatus::Success;
        }
        let switch = self.state.enter(&self.substrate, |s| {
            let wake_tick = s.clock.current() + ticks;
            s.scheduler.mark_sleeping(tid, wake_tick);
            s.scheduler.schedule(SuspendReason::Sleep)
        });
        self.perform_switch_opt(switch);
        VmStatus::Success
    }

    // ---- Mutex  ----

    pub fn mutex_create(&self, out: Option<&mut MutexId>) -> VmStatus {
        let Some(out) = out else {
            return VmStatus::InvalidParameter;
        };
        *out = self.state.enter(&self.substrate, |s| s.mutexes.create());
        VmStatus::Success
    }

    pub fn mutex_delete(&self, mid: MutexId) -> VmStatus {
        self.state.enter(&self.substrate, |s| {
            let Some(m) = s.mutexes.get(mid) else {
                return VmStatus::InvalidId;
            };
            if m.owner().is_some() {
                return VmStatus::InvalidState;
            }
            s.mutexes.remove(mid);
            VmStatus::Success
        })
    }

    pub fn mutex_query(&self, mid: MutexId, out: Option<&mut ThreadId>) -> VmStatus {
        let Some(out) = out else {
            return VmStatus::InvalidParameter;
        };
        self.state.enter(&self.substrate, |s| match s.mutexes.get(mid) {
            Some(m) => {
                *out = m.owner().unwrap_or(INVALID_THREAD);
                VmStatus::Success
            }
            None => VmStatus::InvalidId,
        })
    }

    /// `mutex_acquire(mid, timeout)`. Loops across
    /// suspensions because a released waiter is only *unblocked*, not
    /// necessarily handed ownership — it must re-test and may lose a race
    /// to a higher-priority late arrival before the VM schedules it.
    pub fn mutex_acquire(self: &Arc<Self>, mid: MutexId, timeout: Ticks) -> VmStatus {
        let tid = self.thread_id();
        let priority = self.priority_of(tid);

        loop {
            enum Decision {
                Acquired,
                InvalidId,
                ImmediateFailure,
                Parked(Option<Switch>),
            }
            let decision = self.state.enter(&self.substrate, |s| {
                let Some(mutex) = s.mutexes.get_mut(mid) else {
                    return Decision::InvalidId;
                };
                match mutex.try_acquire(tid, priority) {
                    AcquireOutcome::Acquired => Decision::Acquired,
                    AcquireOutcome::MustWait => {
                        if timeout == IMMEDIATE {
                            mutex.cancel_wait(tid);
                            return Decision::ImmediateFailure;
                        }
                        if timeout != INFINITE {
                            let deadline = s.clock.current() + timeout;
                            s.mutex_deadlines.push((tid, mid, deadline));
                        }
                        s.scheduler.mark_waiting(tid);
                        Decision::Parked(s.scheduler.schedule(SuspendReason::MutexWait))
                    }
                }
            });
            match decision {
                Decision::InvalidId => return VmStatus::InvalidId,
                Decision::Acquired => {
                    log::debug!("mutex_acquire: mid={mid} tid={tid} (uncontended or granted)");
                    return VmStatus::Success;
                }
                Decision::ImmediateFailure => return VmStatus::Failure,
                Decision::Parked(switch) => {
                    self.perform_switch_opt(switch);
                    let (is_owner, timed_out) = self.state.enter(&self.substrate, |s| {
                        let is_owner = s.mutexes.get(mid).is_some_and(|m| m.owner() == Some(tid));
                        let tcb = s.scheduler.threads.get_mut(tid).expect("mutex_acquire: self vanished");
                        let timed_out = tcb.wait_timed_out;
                        tcb.wait_timed_out = false;
                        (is_owner, timed_out)
                    });
                    if is_owner {
                        return VmStatus::Success;
                    }
                    if timed_out {
                        log::debug!("mutex_acquire: mid={mid} tid={tid} timed out");
                        return VmStatus::Failure;
                    }
                    // Spurious wake (released but outraced, or a stale
                    // deadline entry from an earlier wait on a different
                    // mutex); loop and re-contend.
                }
            }
        }
    }

    /// `mutex_release(mid)`.
    pub fn mutex_release(self: &Arc<Self>, mid: MutexId) -> VmStatus {
        let tid = self.thread_id();
        enum Decision {
            InvalidId,
            NotOwner,
            Released(Option<ThreadId>),
        }
        let decision = self.state.enter(&self.substrate, |s| {
            let Some(mutex) = s.mutexes.get_mut(mid) else {
                return Decision::InvalidId;
            };
            if mutex.owner() != Some(tid) {
                return Decision::NotOwner;
            }
            Decision::Released(mutex.release(tid))
        });
        match decision {
            Decision::InvalidId => return VmStatus::InvalidId,
            Decision::NotOwner => return VmStatus::InvalidState,
            Decision::Released(None) => {
                log::trace!("mutex_release: mid={mid} tid={tid}, no waiters");
                return VmStatus::Success;
            }
            Decision::Released(Some(next)) => {
                let next_priority = self.priority_of(next);
                let switch = self.state.enter(&self.substrate, |s| {
                    s.scheduler.mark_ready(next, next_priority);
                    s.scheduler.schedule(SuspendReason::Priority)
                });
                log::debug!("mutex_release: mid={mid} tid={tid}, unblocked {next}");
                self.perform_switch_opt(switch);
                VmStatus::Success
            }
        }
    }

    // ---- Semaphore (SPEC_FULL.md §4.6a) ----

    pub fn semaphore_create(&self, initial: u32, out: Option<&mut SemaphoreId>) -> VmStatus {
        let Some(out) = out else {
            return VmStatus::InvalidParameter;
        };
        *out = self.state.enter(&self.substrate, |s| s.semaphores.create(initial));
        VmStatus::Success
    }

    pub fn semaphore_delete(&self, sid: SemaphoreId) -> VmStatus {
        self.state.enter(&self.substrate, |s| {
            if s.semaphores.get(sid).is_none() {
                return VmStatus::InvalidId;
            }
            s.semaphores.remove(sid);
            VmStatus::Success
        })
    }

    /// `wait()`/`Down`: blocks until a slot is available. Unlike the
    /// mutex, no timeout and no re-verification loop — `signal` hands the
    /// freed slot directly to the woken waiter, so there is nothing to
    /// race after resuming.
    pub fn semaphore_wait(self: &Arc<Self>, sid: SemaphoreId) -> VmStatus {
        let tid = self.thread_id();
        let priority = self.priority_of(tid);
        enum Decision {
            InvalidId,
            Acquired,
            Parked(Option<Switch>),
        }
        let decision = self.state.enter(&self.substrate, |s| {
            let Some(sem) = s.semaphores.get_mut(sid) else {
                return Decision::InvalidId;
            };
            match sem.wait(tid, priority) {
                WaitOutcome::Acquired => Decision::Acquired,
                WaitOutcome::MustWait => {
                    s.scheduler.mark_waiting(tid);
                    Decision::Parked(s.scheduler.schedule(SuspendReason::MutexWait))
                }
            }
        });
        match decision {
            Decision::InvalidId => VmStatus::InvalidId,
            Decision::Acquired => VmStatus::Success,
            Decision::Parked(switch) => {
                self.perform_switch_opt(switch);
                VmStatus::Success
            }
        }
    }

    /// `signal()`/`Up`.
    pub fn semaphore_signal(self: &Arc<Self>, sid: SemaphoreId) -> VmStatus {
        enum Decision {
            InvalidId,
            Restored,
            Woke(ThreadId),
        }
        let decision = self.state.enter(&self.substrate, |s| {
            let Some(sem) = s.semaphores.get_mut(sid) else {
                return Decision::InvalidId;
            };
            match sem.signal() {
                Some(tid) => Decision::Woke(tid),
                None => Decision::Restored,
            }
        });
        match decision {
            Decision::InvalidId => VmStatus::InvalidId,
            Decision::Restored => VmStatus::Success,
            Decision::Woke(tid) => {
                let priority = self.priority_of(tid);
                let switch = self.state.enter(&self.substrate, |s| {
                    s.scheduler.mark_ready(tid, priority);
                    s.scheduler.schedule(SuspendReason::Priority)
                });
                self.perform_switch_opt(switch);
                VmStatus::Success
            }
        }
    }
}

/// The idle thread's body.
/// Repeatedly offers to yield to anything else ready; when nothing is, it
/// parks the idle OS thread briefly rather than spinning the host CPU —
/// a `vmkit::testing`-only concession, since a real substrate's idle
/// thread would simply execute a `hlt`-style wait-for-interrupt.
fn idle_loop<S: Substrate + 'static>(vm: Arc<Vm<S>>) {
    loop {
        let switch = vm
            .state
            .enter(&vm.substrate, |s| s.scheduler.schedule(SuspendReason::Priority));
        match switch {
            Some(switch) => vm.perform_switch(switch),
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
}

// Used by `file_io` to resolve a context id without duplicating the lookup.
impl<S: Substrate + 'static> Vm<S> {
    pub(crate) fn context_of(&self, tid: ThreadId) -> ContextId {
        self.state
            .enter(&self.substrate, |s| s.scheduler.threads.get(tid).and_then(|t| t.context))
            .expect("context_of: thread has no context")
    }
}
