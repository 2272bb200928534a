// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Status codes returned by the public API surface.
//!
//! Every `vmkit` entry point returns one of these by value; there is no
//! ambient exception channel (`spec.md` §7's propagation policy).
//! Substrate-facing failures use [`SubstrateError`] instead and are mapped
//! to [`VmStatus::Failure`] at the API boundary in [`crate::vm`].

use thiserror::Error;

/// Status returned by every operation in the public API surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VmStatus {
    /// The operation completed as requested.
    #[error("success")]
    Success,

    /// The operation failed for a reason surfaced by the substrate (e.g. a
    /// negative file I/O completion result) or by a semantic rule whose
    /// failure is a normal outcome (e.g. a mutex-acquire timeout).
    #[error("operation failed")]
    Failure,

    /// A null output pointer or a semantically impossible argument (e.g.
    /// `thread_sleep(INFINITE)`).
    #[error("invalid parameter")]
    InvalidParameter,

    /// A reference to an unknown thread or mutex id.
    #[error("invalid id")]
    InvalidId,

    /// The operation requires a lifecycle state the target isn't in (e.g.
    /// terminating an already-dead thread, releasing a mutex you don't own).
    #[error("invalid state for this operation")]
    InvalidState,
}

/// `Result` alias for internal plumbing that wants `?`. Public API functions
/// still return `VmStatus` by value, never this alias.
pub type VmResult<T> = Result<T, VmStatus>;

/// Failures reported by a [`crate::substrate::Substrate`] implementation
/// itself, as opposed to failures of the operation it was asked to perform.
///
/// These never cross the public API boundary as-is; [`crate::vm::Vm`] maps
/// them to [`VmStatus::Failure`] and logs the detail at `warn`.
#[derive(Debug, Error)]
pub enum SubstrateError {
    #[error("substrate could not provide {requested} bytes of shared memory")]
    SharedMemoryUnavailable { requested: usize },

    #[error("substrate reported I/O failure: {0}")]
    Io(i64),
}
