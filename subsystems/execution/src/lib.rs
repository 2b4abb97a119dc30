//! # Ember Execution Subsystem
//!
//! Cooperative thread lifecycle core of a single-address-space kernel:
//!
//! - The [`thread::Thread`] control block and its state transitions
//! - Per-processor [`thread::ThreadManager`] registries and FIFO wait queues
//! - The control-flow primitives that perform an actual context switch
//!   (suspend, yield, resume, exit) and clone-style creation
//!
//! ## Key Principle
//!
//! Scheduling is cooperative and processor-local by construction. Exactly one
//! thread runs per processor; a switch happens only at an explicit yield or
//! at exit. The only cross-processor shared state is the identity counter.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod context;
pub mod scheduler;
pub mod thread;

use core::sync::atomic::{AtomicU64, Ordering};

/// Process-wide thread identity counter. 0 is reserved for each processor's
/// implicit main thread, so allocation starts at 1.
static THREAD_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for threads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(u64);

impl ThreadId {
    /// Allocate the next process-wide identity.
    ///
    /// Monotonic and unique across concurrently creating processors; the
    /// atomic increment is the only synchronization involved.
    pub fn new() -> Self {
        Self(THREAD_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The identity of a processor's implicit main thread.
    pub const fn main() -> Self {
        Self(0)
    }

    /// The most recently allocated identity.
    pub fn last() -> Self {
        Self(THREAD_COUNTER.load(Ordering::Relaxed) - 1)
    }

    /// Rebuild an identity from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identity value
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

/// Execution result type
pub type ExecResult<T> = Result<T, ExecError>;

/// Execution errors
///
/// Only environmental failures are represented here. Contract breaches
/// (erasing an unknown thread, waking an empty queue, exiting the main
/// thread) are faults and panic instead of returning a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    /// Thread not found
    ThreadNotFound,
    /// Already exists
    AlreadyExists,
    /// Out of resources
    OutOfResources,
    /// Invalid argument
    InvalidArgument,
    /// Subsystem not initialized
    NotInitialized,
}
