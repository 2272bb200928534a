// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Blocking file I/O built on the substrate's asynchronous callbacks,
//! grounded on `kernel/sync/wait_queue.rs`'s park/wake
//! shape: a thread that can't proceed synchronously marks itself `Waiting`,
//! asks the scheduler to run something else, and only returns to its caller
//! once a completion callback has marked it `Ready` again and it has been
//! switched back in.
//!
//! Every request is issued to the substrate from *inside* the same
//! `Guarded::enter` call that marks the thread `Waiting` — not after. That
//! ordering matters: `vmkit::testing::ThreadedSubstrate` dispatches
//! completions from a separate OS thread that may run arbitrarily fast, and
//! that thread's own completion handler also needs `Guarded::enter`'s lock
//! before it can touch the scheduler. Issuing the request while still
//! holding the lock guarantees the park happens-before any possible
//! wake, instead of racing a near-instant completion against the caller's
//! own bookkeeping.
//!
//! Transfers larger than one bounce chunk loop `CHUNK_SIZE` bytes at a
//! time; a short read or write ends the loop early exactly like a short
//! `read(2)`/`write(2)` would.

use std::sync::Arc;

use crate::bounce_pool::CHUNK_SIZE;
use crate::error::VmStatus;
use crate::substrate::{OpenFlags, ResultCallback, SeekFrom, Substrate, TransferCallback};
use crate::types::{SuspendReason, ThreadId};
use crate::vm::Vm;

impl<S: Substrate + 'static> Vm<S> {
    fn blocking_result(self: &Arc<Self>, tid: ThreadId, issue: impl FnOnce(&S, ResultCallback)) -> i64 {
        let vm = Arc::clone(self);
        let switch = self.state.enter(&self.substrate, |s| {
            s.scheduler.mark_waiting(tid);
            let decision = s.scheduler.schedule(SuspendReason::IoWait);
            issue(&self.substrate, Box::new(move |result| vm.on_simple_io_complete(tid, result)));
            decision
        });
        self.perform_switch_opt(switch);
        self.state.enter(&self.substrate, |s| s.scheduler.threads.get(tid).unwrap().file_result)
    }

    fn blocking_transfer(self: &Arc<Self>, tid: ThreadId, issue: impl FnOnce(&S, TransferCallback)) -> (Vec<u8>, i64) {
        let vm = Arc::clone(self);
        let switch = self.state.enter(&self.substrate, |s| {
            s.scheduler.mark_waiting(tid);
            let decision = s.scheduler.schedule(SuspendReason::IoWait);
            issue(&self.substrate, Box::new(move |buf, result| vm.on_transfer_complete(tid, buf, result)));
            decision
        });
        self.perform_switch_opt(switch);
        self.state
            .enter(&self.substrate, |s| s.pending_transfers.remove(&tid))
            .expect("transfer completed without leaving a result behind")
    }

    fn on_simple_io_complete(self: &Arc<Self>, tid: ThreadId, result: i64) {
        let switch = self.state.enter(&self.substrate, |s| {
            let tcb = s.scheduler.threads.get_mut(tid).expect("io completion for unknown thread");
            tcb.file_result = result;
            let priority = tcb.priority;
            s.scheduler.mark_ready(tid, priority);
            s.scheduler.schedule(SuspendReason::Priority)
        });
        self.perform_switch_opt(switch);
    }

    fn on_transfer_complete(self: &Arc<Self>, tid: ThreadId, buf: Vec<u8>, result: i64) {
        let switch = self.state.enter(&self.substrate, |s| {
            s.pending_transfers.insert(tid, (buf, result));
            let priority = s.scheduler.threads.get(tid).expect("io completion for unknown thread").priority;
            s.scheduler.mark_ready(tid, priority);
            s.scheduler.schedule(SuspendReason::Priority)
        });
        self.perform_switch_opt(switch);
    }

    /// `file_open(path, flags, mode)`.
    pub fn file_open(self: &Arc<Self>, path: &str, flags: OpenFlags, mode: u32, out_fd: Option<&mut i32>) -> VmStatus {
        let Some(out_fd) = out_fd else {
            return VmStatus::InvalidParameter;
        };
        let tid = self.thread_id();
        let path = path.to_owned();
        let result = self.blocking_result(tid, move |substrate, cb| substrate.file_open(&path, flags, mode, cb));
        if result < 0 {
            return VmStatus::Failure;
        }
        *out_fd = result as i32;
        VmStatus::Success
    }

    pub fn file_close(self: &Arc<Self>, fd: i32) -> VmStatus {
        let tid = self.thread_id();
        let result = self.blocking_result(tid, move |substrate, cb| substrate.file_close(fd, cb));
        if result < 0 {
            VmStatus::Failure
        } else {
            VmStatus::Success
        }
    }

    pub fn file_seek(self: &Arc<Self>, fd: i32, offset: i64, whence: SeekFrom, out_pos: Option<&mut i64>) -> VmStatus {
        let tid = self.thread_id();
        let result = self.blocking_result(tid, move |substrate, cb| substrate.file_seek(fd, offset, whence, cb));
        if result < 0 {
            return VmStatus::Failure;
        }
        if let Some(out_pos) = out_pos {
            *out_pos = result;
        }
        VmStatus::Success
    }

    /// `file_read(fd, buf)`. Fills `buf` in `CHUNK_SIZE`
    /// pieces, stopping early on a short read (including one caused by the
    /// bounce pool itself running out of chunks — `vmkit` does not queue
    /// transfers waiting for one to free up).
    pub fn file_read(self: &Arc<Self>, fd: i32, buf: &mut [u8], out_len: Option<&mut usize>) -> VmStatus {
        let Some(out_len) = out_len else {
            return VmStatus::InvalidParameter;
        };
        let tid = self.thread_id();
        let mut total = 0usize;
        while total < buf.len() {
            let want = (buf.len() - total).min(CHUNK_SIZE);
            let Some(chunk) = self.state.enter(&self.substrate, |s| s.pool.acquire()) else {
                break;
            };
            let (chunk, result) =
                self.blocking_transfer(tid, move |substrate, cb| substrate.file_read(fd, chunk, want, cb));
            let n = result.max(0) as usize;
            buf[total..total + n].copy_from_slice(&chunk[..n]);
            self.state.enter(&self.substrate, |s| s.pool.release(chunk));
            if result < 0 {
                *out_len = total;
                return if total > 0 { VmStatus::Success } else { VmStatus::Failure };
            }
            total += n;
            if n < want {
                break; // short read: end of file
            }
        }
        *out_len = total;
        VmStatus::Success
    }

    /// `file_write(fd, buf)`.
    pub fn file_write(self: &Arc<Self>, fd: i32, buf: &[u8], out_len: Option<&mut usize>) -> VmStatus {
        let Some(out_len) = out_len else {
            return VmStatus::InvalidParameter;
        };
        let tid = self.thread_id();
        let mut total = 0usize;
        while total < buf.len() {
            let want = (buf.len() - total).min(CHUNK_SIZE);
            let Some(mut chunk) = self.state.enter(&self.substrate, |s| s.pool.acquire()) else {
                break;
            };
            chunk[..want].copy_from_slice(&buf[total..total + want]);
            let (chunk, result) =
                self.blocking_transfer(tid, move |substrate, cb| substrate.file_write(fd, chunk, want, cb));
            self.state.enter(&self.substrate, |s| s.pool.release(chunk));
            if result < 0 {
                *out_len = total;
                return if total > 0 { VmStatus::Success } else { VmStatus::Failure };
            }
            let n = result as usize;
            total += n;
            if n < want {
                break; // short write
            }
        }
        *out_len = total;
        VmStatus::Success
    }
}
