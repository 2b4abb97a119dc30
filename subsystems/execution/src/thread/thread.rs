//! # Thread Structure
//!
//! The thread control block. Family links are identity handles resolved
//! through a registry, never owning pointers, so tearing a thread down can
//! never leave a dangling reference in a sibling's or parent's collection.

use crate::context::Continuation;
use crate::ThreadId;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use ember_hal::VirtAddr;
use spin::{Mutex, RwLock};

/// Clone-style creation flags
pub mod flags {
    use bitflags::bitflags;

    bitflags! {
        /// Creation flags (Linux clone encoding)
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct CloneFlags: u32 {
            /// Zero the supplied address when the thread exits
            const CHILD_CLEARTID = 0x0020_0000;
            /// Write the new identity to the supplied address before
            /// creation returns
            const CHILD_SETTID = 0x0100_0000;
        }
    }
}

pub use flags::CloneFlags;

/// Thread control block
pub struct Thread {
    /// Unique identifier
    id: ThreadId,
    /// Parent thread; `None` only for a processor's implicit main thread
    parent: RwLock<Option<ThreadId>>,
    /// Live threads whose parent link points back here, in creation order
    children: RwLock<Vec<ThreadId>>,
    /// Thread-local-storage base; set exactly once at activation
    tls_area: RwLock<Option<VirtAddr>>,
    /// Stack region supplied at creation (memory owned by the creator)
    stack_base: VirtAddr,
    /// Saved continuation; only meaningful while the thread is off-CPU
    continuation: Mutex<Option<Continuation>>,
    /// False until the first voluntary suspend: selects fresh-clone-return
    /// vs continuation-restore on the next resume
    yielded: AtomicBool,
    /// Address zeroed at exit (clone "clear child TID" contract)
    clear_child_tid: Option<VirtAddr>,
}

impl Thread {
    /// Create a new control block
    pub(crate) fn new(
        id: ThreadId,
        parent: Option<ThreadId>,
        stack_base: VirtAddr,
        clear_child_tid: Option<VirtAddr>,
    ) -> Self {
        Self {
            id,
            parent: RwLock::new(parent),
            children: RwLock::new(Vec::new()),
            tls_area: RwLock::new(None),
            stack_base,
            continuation: Mutex::new(None),
            yielded: AtomicBool::new(false),
            clear_child_tid,
        }
    }

    /// Get thread ID
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Get the parent thread identity
    pub fn parent(&self) -> Option<ThreadId> {
        *self.parent.read()
    }

    /// Re-parent this thread (orphan adoption)
    pub fn set_parent(&self, parent: ThreadId) {
        *self.parent.write() = Some(parent);
    }

    /// Get the children identities, in creation order
    pub fn children(&self) -> Vec<ThreadId> {
        self.children.read().clone()
    }

    /// Link a child
    pub(crate) fn add_child(&self, child: ThreadId) {
        self.children.write().push(child);
    }

    /// Unlink a child
    pub(crate) fn remove_child(&self, child: ThreadId) {
        self.children.write().retain(|&c| c != child);
    }

    /// Take the whole child list, leaving it empty
    pub(crate) fn take_children(&self) -> Vec<ThreadId> {
        core::mem::take(&mut *self.children.write())
    }

    /// Get the thread-local-storage base, if activated
    pub fn tls_area(&self) -> Option<VirtAddr> {
        *self.tls_area.read()
    }

    /// Record the thread-local-storage base. Activation happens once.
    pub(crate) fn set_tls_area(&self, area: VirtAddr) {
        let mut tls = self.tls_area.write();
        debug_assert!(tls.is_none(), "thread area activated twice");
        *tls = Some(area);
    }

    /// Get the stack region recorded at creation
    pub fn stack_base(&self) -> VirtAddr {
        self.stack_base
    }

    /// Record where this thread resumes once it is next woken.
    pub fn store_continuation(&self, cont: Continuation) {
        log::trace!(
            "thread {} storing return point {:#x} with stack {:#x}",
            self.id.as_u64(),
            cont.ip.as_u64(),
            cont.sp.as_u64()
        );
        *self.continuation.lock() = Some(cont);
    }

    /// The saved continuation, if any
    pub fn continuation(&self) -> Option<Continuation> {
        *self.continuation.lock()
    }

    /// Whether the next resume uses continuation-restore semantics
    pub fn has_yielded(&self) -> bool {
        self.yielded.load(Ordering::SeqCst)
    }

    /// Mark this thread as voluntarily suspended
    pub(crate) fn mark_yielded(&self) {
        self.yielded.store(true, Ordering::SeqCst);
    }

    /// Read and clear the yielded marker in one step
    pub(crate) fn consume_yielded(&self) -> bool {
        self.yielded.swap(false, Ordering::SeqCst)
    }

    /// The address to zero at exit, if requested at creation
    pub fn clear_child_tid(&self) -> Option<VirtAddr> {
        self.clear_child_tid
    }
}
