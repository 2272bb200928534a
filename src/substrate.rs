// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! The machine substrate boundary.
//!
//! `vmkit` is the hard core only: the thread scheduler, the I/O bridge, the
//! mutex, and the signal-suspension discipline. The machine underneath it —
//! the alarm, the async file syscalls, the context-switch primitive, the
//! signal mask — is an external collaborator whose interface is fixed here
//! but whose implementation is out of scope. Real embedders implement
//! [`Substrate`] against their host; `vmkit::testing` ships an
//! implementation for tests and doctests.
//!
//! Two design choices depart from the C-shaped `cb(calldata, result)`
//! signatures `spec.md` §6 describes:
//!
//! - Callbacks are `FnOnce`/`Fn` closures, not function-pointer-plus-opaque-
//!   calldata pairs. The closure captures whatever the original C code would
//!   have stuffed into `calldata`.
//! - `file_read`/`file_write` take and return the transfer buffer **by
//!   value** instead of by raw pointer. The substrate is handed ownership of
//!   the bounce chunk for the duration of the async operation and gives it
//!   back through the completion callback. This is the same
//!   ownership-transfer shape `io_uring`-oriented async I/O crates use to
//!   avoid aliasing a buffer the kernel is still touching, and it lets
//!   [`Substrate`] stay entirely safe code.

use std::time::Duration;

use crate::error::SubstrateError;

/// Opaque handle to a substrate-level execution context, created by
/// [`Substrate::spawn_context`] and later passed to
/// [`Substrate::switch_context`]. `spec.md` §9's design notes call this an
/// opaque two-sided swap; `vmkit` never inspects the handle's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u64);

/// Opaque token returned by [`Substrate::suspend_signals`] and handed back
/// to [`Substrate::resume_signals`]. Real substrates use it to restore the
/// exact prior signal mask; `vmkit` never inspects it.
pub trait SignalToken: Send + 'static {}
impl<T: Send + 'static> SignalToken for T {}

/// Where a `file_seek` offset is measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    Start,
    Current,
    End,
}

/// Flags for `file_open`. Intentionally minimal — `vmkit` passes them
/// through to the substrate and never inspects them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub truncate: bool,
}

/// A completion callback for an operation that yields a single signed
/// result (open, close, seek): negative means failure, matching `spec.md`
/// §3's thread control block "last file-operation result" field.
pub type ResultCallback = Box<dyn FnOnce(i64) + Send>;

/// A completion callback for a transfer operation (read, write): the
/// bounce-buffer chunk is handed back along with the signed result.
pub type TransferCallback = Box<dyn FnOnce(Vec<u8>, i64) + Send>;

/// The machine substrate: asynchronous I/O, a periodic alarm, a
/// context-switch primitive, and the signal mask used as the sole locking
/// discipline. All methods other than the signal-mask pair
/// are asynchronous: they return immediately and report their outcome
/// through the supplied callback, which the substrate invokes from
/// whatever execution context it chooses (in `vmkit::testing`, a
/// dispatcher thread).
pub trait Substrate: Send + Sync {
    /// Carves `shared_bytes` of DMA-safe shared memory out of the substrate
    /// for the bounce-buffer pool. Called exactly once, at `Vm::start`.
    /// `Err` maps to `VmStatus::Failure` at `Vm::start`'s call site.
    fn initialize(&self, shared_bytes: usize) -> Result<Box<[u8]>, SubstrateError>;

    /// Releases whatever `initialize` reserved. Called exactly once, when
    /// the `Vm` is dropped.
    fn terminate(&self);

    /// Unmasks delivery of the alarm and I/O completion callbacks. Called
    /// once at startup, before the first `request_alarm`.
    fn enable_signals(&self);

    /// Masks delivery of the alarm and I/O completion callbacks and returns
    /// a token capturing the prior mask state. The mask is process-wide,
    /// not nested-counting — callers must not call
    /// `suspend_signals` again before the matching `resume_signals`.
    fn suspend_signals(&self) -> Box<dyn SignalToken>;

    /// Restores the mask state captured by a prior `suspend_signals` call.
    fn resume_signals(&self, token: Box<dyn SignalToken>);

    /// Installs a periodic callback invoked roughly every `period`. Called
    /// exactly once, at startup.
    fn request_alarm(&self, period: Duration, callback: Box<dyn Fn() + Send + Sync>);

    /// Creates an execution context that, when first switched into, runs
    /// `entry` to completion on a stack of at least `stack_size` bytes.
    fn spawn_context(&self, stack_size: usize, entry: Box<dyn FnOnce() + Send>) -> ContextId;

    /// Switches control from `from` to `to`. May not return to the caller
    /// if `from`'s thread never runs again (the scheduler's one-way switch
    /// on termination) — see `spec.md` §9's design notes on context
    /// switching.
    fn switch_context(&self, from: ContextId, to: ContextId);

    fn file_open(&self, path: &str, flags: OpenFlags, mode: u32, callback: ResultCallback);
    fn file_close(&self, fd: i32, callback: ResultCallback);
    fn file_read(&self, fd: i32, buf: Vec<u8>, len: usize, callback: TransferCallback);
    fn file_write(&self, fd: i32, buf: Vec<u8>, len: usize, callback: TransferCallback);
    fn file_seek(&self, fd: i32, offset: i64, whence: SeekFrom, callback: ResultCallback);
}
