// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! A [`Substrate`] implementation backed by real OS threads, for tests and
//! doctests.
//!
//! There is no portable way to swap stacks without unsafe assembly, and none
//! is needed here: each `spawn_context` gets its own OS thread, parked on a
//! condvar until the scheduler first switches into it. `switch_context`
//! always wakes the target thread; whether it *also* blocks the caller
//! depends on a single check — is the caller currently executing as the
//! `from` context? A cooperative self-yield (a thread calling back into the
//! VM and suspending) is always running on `from`'s own OS thread, so it
//! parks and waits to be granted again. The alarm thread, I/O-completion
//! threads, and the initial bootstrap dispatch in [`crate::vm::Vm::start`]
//! are never `from`'s own thread, so for them the switch is a fire-and-forget
//! handoff, matching how the alarm and I/O callbacks are meant to deliver
//! asynchronously; the bootstrap dispatch needs no special sentinel
//! context to get the same treatment.

use std::cell::Cell;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom as IoSeekFrom, Write};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::substrate::{ContextId, OpenFlags, ResultCallback, SeekFrom, Substrate, TransferCallback};

/// Threads spawned with a requested size below this are bumped up to it;
/// the idle thread asks for 0 since it never does anything but switch.
const MIN_STACK: usize = 64 * 1024;

thread_local! {
    static CURRENT_CONTEXT: Cell<Option<ContextId>> = Cell::new(None);
}

struct ContextHandle {
    granted: Mutex<bool>,
    cv: Condvar,
}

impl ContextHandle {
    fn new() -> Self {
        Self {
            granted: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn grant(&self) {
        let mut granted = self.granted.lock().unwrap();
        *granted = true;
        self.cv.notify_one();
    }

    /// Blocks the calling thread until this handle is granted, then
    /// consumes the grant.
    fn park(&self) {
        let mut granted = self.granted.lock().unwrap();
        while !*granted {
            granted = self.cv.wait(granted).unwrap();
        }
        *granted = false;
    }
}

struct AlarmState {
    handle: Option<std::thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

pub struct ThreadedSubstrate {
    contexts: Mutex<HashMap<ContextId, Arc<ContextHandle>>>,
    next_context_id: AtomicU64,
    files: Arc<Mutex<HashMap<i32, File>>>,
    next_fd: Arc<AtomicI32>,
    alarm: Mutex<Option<AlarmState>>,
}

impl ThreadedSubstrate {
    pub fn new() -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            next_context_id: AtomicU64::new(1),
            files: Arc::new(Mutex::new(HashMap::new())),
            next_fd: Arc::new(AtomicI32::new(3)),
            alarm: Mutex::new(None),
        }
    }

    fn handle_for(&self, id: ContextId) -> Arc<ContextHandle> {
        Arc::clone(
            self.contexts
                .lock()
                .unwrap()
                .get(&id)
                .expect("switch_context: unknown context id"),
        )
    }
}

impl Default for ThreadedSubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl Substrate for ThreadedSubstrate {
    fn initialize(&self, shared_bytes: usize) -> Result<Box<[u8]>, crate::error::SubstrateError> {
        Ok(vec![0u8; shared_bytes].into_boxed_slice())
    }

    fn terminate(&self) {
        if let Some(alarm) = self.alarm.lock().unwrap().take() {
            alarm.stop.store(true, Ordering::SeqCst);
            // The alarm thread wakes at the next tick boundary and exits;
            // nothing blocks on its join, so dropping the handle is enough
            // to let the process exit without leaking a running thread
            // past this call.
            let _ = alarm.handle;
        }
    }

    fn enable_signals(&self) {}

    fn suspend_signals(&self) -> Box<dyn crate::substrate::SignalToken> {
        Box::new(())
    }

    fn resume_signals(&self, _token: Box<dyn crate::substrate::SignalToken>) {}

    fn request_alarm(&self, period: Duration, callback: Box<dyn Fn() + Send + Sync>) {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("vmkit-alarm".into())
            .spawn(move || loop {
                std::thread::sleep(period);
                if thread_stop.load(Ordering::SeqCst) {
                    break;
                }
                callback();
            })
            .expect("failed to spawn alarm thread");
        *self.alarm.lock().unwrap() = Some(AlarmState { handle: Some(handle), stop });
    }

    fn spawn_context(&self, stack_size: usize, entry: Box<dyn FnOnce() + Send>) -> ContextId {
        let id = ContextId(self.next_context_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ContextHandle::new());
        self.contexts.lock().unwrap().insert(id, Arc::clone(&handle));

        std::thread::Builder::new()
            .name(format!("vmkit-ctx-{}", id.0))
            .stack_size(stack_size.max(MIN_STACK))
            .spawn(move || {
                CURRENT_CONTEXT.with(|c| c.set(Some(id)));
                handle.park();
                entry();
            })
            .expect("failed to spawn context thread");
        id
    }

    fn switch_context(&self, from: ContextId, to: ContextId) {
        let to_handle = self.handle_for(to);
        to_handle.grant();

        let is_self_yield = CURRENT_CONTEXT.with(|c| c.get() == Some(from));
        if is_self_yield {
            let from_handle = self.handle_for(from);
            from_handle.park();
        }
    }

    fn file_open(&self, path: &str, flags: OpenFlags, _mode: u32, callback: ResultCallback) {
        let path = path.to_owned();
        let next_fd = Arc::clone(&self.next_fd);
        let files = Arc::clone(&self.files);
        std::thread::spawn(move || {
            let mut options = OpenOptions::new();
            options.read(flags.read).write(flags.write).create(flags.create).truncate(flags.truncate);
            match options.open(&path) {
                Ok(file) => {
                    let fd = next_fd.fetch_add(1, Ordering::Relaxed);
                    files.lock().unwrap().insert(fd, file);
                    callback(fd as i64);
                }
                Err(_) => callback(-1),
            }
        });
    }

    fn file_close(&self, fd: i32, callback: ResultCallback) {
        let files = Arc::clone(&self.files);
        std::thread::spawn(move || {
            let result = if files.lock().unwrap().remove(&fd).is_some() { 0 } else { -1 };
            callback(result);
        });
    }

    fn file_read(&self, fd: i32, mut buf: Vec<u8>, len: usize, callback: TransferCallback) {
        let files = Arc::clone(&self.files);
        std::thread::spawn(move || {
            let mut files = files.lock().unwrap();
            let result = match files.get_mut(&fd) {
                Some(file) => match file.read(&mut buf[..len.min(buf.len())]) {
                    Ok(n) => n as i64,
                    Err(_) => -1,
                },
                None => -1,
            };
            drop(files);
            callback(buf, result);
        });
    }

    fn file_write(&self, fd: i32, buf: Vec<u8>, len: usize, callback: TransferCallback) {
        let files = Arc::clone(&self.files);
        std::thread::spawn(move || {
            let mut files = files.lock().unwrap();
            let result = match files.get_mut(&fd) {
                Some(file) => match file.write(&buf[..len.min(buf.len())]) {
                    Ok(n) => n as i64,
                    Err(_) => -1,
                },
                None => -1,
            };
            drop(files);
            callback(buf, result);
        });
    }

    fn file_seek(&self, fd: i32, offset: i64, whence: SeekFrom, callback: ResultCallback) {
        let files = Arc::clone(&self.files);
        std::thread::spawn(move || {
            let mut files = files.lock().unwrap();
            let pos = match whence {
                SeekFrom::Start => IoSeekFrom::Start(offset as u64),
                SeekFrom::Current => IoSeekFrom::Current(offset),
                SeekFrom::End => IoSeekFrom::End(offset),
            };
            let result = match files.get_mut(&fd) {
                Some(file) => match file.seek(pos) {
                    Ok(n) => n as i64,
                    Err(_) => -1,
                },
                None => -1,
            };
            drop(files);
            callback(result);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn switch_context_to_a_fresh_context_runs_its_entry() {
        let substrate = ThreadedSubstrate::new();
        let (tx, rx) = mpsc::channel();
        let bootstrap = ContextId(0);
        let ctx = substrate.spawn_context(0, Box::new(move || tx.send(()).unwrap()));
        substrate.switch_context(bootstrap, ctx);
        rx.recv_timeout(Duration::from_secs(1)).expect("entry did not run");
    }

    #[test]
    fn self_yield_blocks_the_caller_until_granted_again() {
        let substrate = Arc::new(ThreadedSubstrate::new());
        let (ready_tx, ready_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let sub_for_a = Arc::clone(&substrate);
        let bootstrap = ContextId(0);
        let a_id_slot: Arc<Mutex<Option<ContextId>>> = Arc::new(Mutex::new(None));
        let a_id_slot_2 = Arc::clone(&a_id_slot);

        let a = substrate.spawn_context(
            0,
            Box::new(move || {
                ready_tx.send(()).unwrap();
                // Yield back to bootstrap, then resume and signal done.
                let a_id = a_id_slot_2.lock().unwrap().unwrap();
                sub_for_a.switch_context(a_id, bootstrap);
                done_tx.send(()).unwrap();
            }),
        );
        *a_id_slot.lock().unwrap() = Some(a);

        substrate.switch_context(bootstrap, a);
        ready_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        // `a` has yielded back to `bootstrap`; grant it again and confirm it
        // finishes.
        substrate.switch_context(bootstrap, a);
        done_rx.recv_timeout(Duration::from_secs(1)).expect("context never resumed");
    }
}
