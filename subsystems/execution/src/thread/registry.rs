//! # Thread Registry
//!
//! Per-processor bookkeeping: the registry of live threads and the FIFO wait
//! queue of suspended ones. One manager exists per processor, resolved
//! through an explicit table initialized once at startup; processor indices
//! are passed explicitly at every call site.

use super::Thread;
use crate::scheduler::metrics::metrics;
use crate::scheduler::queue::WaitQueue;
use crate::{ExecError, ExecResult, ThreadId};
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, Once, RwLock};

/// Per-processor thread manager
///
/// Owns every live thread created on (or migrated to) its processor and the
/// queue of threads suspended there. Never mutated by another processor
/// except through [`ThreadManager::migrate`], whose contract requires the
/// thread not be running.
pub struct ThreadManager {
    /// Owning processor index
    cpu: usize,
    /// Live threads by ID
    threads: RwLock<BTreeMap<ThreadId, Arc<Thread>>>,
    /// Suspended threads, FIFO
    suspended: Mutex<WaitQueue>,
}

impl ThreadManager {
    pub(crate) fn new(cpu: usize) -> Self {
        Self {
            cpu,
            threads: RwLock::new(BTreeMap::new()),
            suspended: Mutex::new(WaitQueue::new()),
        }
    }

    /// The owning processor index
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    /// Register a thread.
    ///
    /// Fails with [`ExecError::AlreadyExists`] if the identity is taken;
    /// callers treat that as thread-creation failure.
    pub fn insert(&self, thread: Arc<Thread>) -> ExecResult<()> {
        let id = thread.id();
        let mut threads = self.threads.write();
        if threads.contains_key(&id) {
            return Err(ExecError::AlreadyExists);
        }
        threads.insert(id, thread);
        Ok(())
    }

    /// Get a thread by ID
    pub fn get(&self, id: ThreadId) -> Option<Arc<Thread>> {
        self.threads.read().get(&id).cloned()
    }

    /// Whether a thread is registered here
    pub fn contains(&self, id: ThreadId) -> bool {
        self.threads.read().contains_key(&id)
    }

    /// Remove a thread.
    ///
    /// The entry must exist; removal of an unknown thread is a contract
    /// breach and faults.
    pub fn remove(&self, id: ThreadId) -> Arc<Thread> {
        self.threads
            .write()
            .remove(&id)
            .expect("erase of a thread unknown to this processor")
    }

    /// The processor's implicit main thread, if bootstrapped
    pub fn main_thread(&self) -> Option<Arc<Thread>> {
        self.get(ThreadId::main())
    }

    /// Number of live threads on this processor
    pub fn count(&self) -> usize {
        self.threads.read().len()
    }

    /// Append a thread to the wait queue.
    ///
    /// The thread must already carry a saved continuation.
    pub fn suspend(&self, id: ThreadId) {
        let mut suspended = self.suspended.lock();
        debug_assert!(!suspended.contains(id), "thread queued twice");
        suspended.enqueue(id);
    }

    /// Pop the front of the wait queue.
    ///
    /// Faults on an empty queue; the yield path checks emptiness first.
    pub fn wakeup_next(&self) -> ThreadId {
        self.suspended.lock().dequeue()
    }

    /// Purge every queue occurrence of a thread
    pub fn erase_suspension(&self, id: ThreadId) {
        self.suspended.lock().remove(id);
    }

    /// Whether the wait queue is empty
    pub fn suspended_empty(&self) -> bool {
        self.suspended.lock().is_empty()
    }

    /// Number of queued threads
    pub fn suspended_len(&self) -> usize {
        self.suspended.lock().len()
    }

    /// Whether a thread is currently queued
    pub fn suspended_contains(&self, id: ThreadId) -> bool {
        self.suspended.lock().contains(id)
    }

    /// Move a thread's bookkeeping to another processor.
    ///
    /// Only ownership moves; physical execution is unaffected. The thread
    /// must not be running, and migration requests for one thread must be
    /// serialized by the caller. Faults if the thread is unknown here.
    pub fn migrate(&self, id: ThreadId, target_cpu: usize) {
        let thread = self.remove(id);
        manager(target_cpu)
            .insert(thread)
            .expect("target processor already owns this identity");
        metrics().record_migration();
        log::debug!(
            "thread {} migrated cpu{} -> cpu{}",
            id.as_u64(),
            self.cpu,
            target_cpu
        );
    }
}

/// Per-processor manager table, initialized once at startup and never
/// reallocated.
static MANAGERS: Once<Vec<ThreadManager>> = Once::new();

/// Initialize bookkeeping for `cpu_count` processors.
///
/// The first call wins; later calls are ignored.
pub fn init(cpu_count: usize) {
    MANAGERS.call_once(|| (0..cpu_count).map(ThreadManager::new).collect());
}

/// The manager owning processor `cpu`.
///
/// Faults when called before [`init`] or with an out-of-range index.
pub fn manager(cpu: usize) -> &'static ThreadManager {
    MANAGERS
        .get()
        .expect("thread managers accessed before init")
        .get(cpu)
        .expect("processor index out of range")
}

/// Process-wide lookup: scan managers in processor order.
///
/// Registries stay processor-local; this is the explicit cross-processor
/// entry point for callers that do not know which processor owns an
/// identity.
pub fn find(id: ThreadId) -> Option<(usize, Arc<Thread>)> {
    MANAGERS
        .get()?
        .iter()
        .enumerate()
        .find_map(|(cpu, m)| m.get(id).map(|t| (cpu, t)))
}
