//! # Thread-Local Storage
//!
//! Thread-area activation and self-location. Each execution context carries
//! a control-block header at the base of its thread-local-storage area; the
//! kernel writes the owning thread's identity into it once, at activation,
//! and reads it back whenever it needs to know which thread is running.

use super::Thread;
use crate::ThreadId;
use alloc::sync::Arc;
use ember_hal::VirtAddr;
use spin::RwLock;
use static_assertions::const_assert_eq;

/// Runtime control-block header at the base of a thread-area.
///
/// The first two slots belong to the language runtime (self pointer and
/// dynamic thread vector, per the TLS ABI); the third is ours and holds the
/// owning kernel thread's identity.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TcbHeader {
    /// Runtime self pointer (first TLS slot per the ABI)
    pub tcb_self: u64,
    /// Dynamic thread vector
    pub dtv: u64,
    /// Identity of the owning kernel thread
    pub kernel_thread: u64,
}

const_assert_eq!(core::mem::size_of::<TcbHeader>(), 24);
const_assert_eq!(core::mem::offset_of!(TcbHeader, kernel_thread), 16);

/// Thread-area access primitive (the FS base on x86_64).
pub trait ThreadAreaOps: Send + Sync {
    /// Read the calling processor's active thread-area base
    fn read(&self) -> VirtAddr;

    /// Install a new thread-area base for the calling processor.
    ///
    /// # Safety
    /// `area` must point to a valid [`TcbHeader`]; it must take effect
    /// before any subsequent access to thread-local state.
    unsafe fn write(&self, area: VirtAddr);
}

/// Thread-area engine
///
/// Holds the installed thread-area backend.
pub struct ThreadAreaEngine {
    backend: RwLock<Option<Arc<dyn ThreadAreaOps>>>,
}

impl ThreadAreaEngine {
    /// Create a new engine with no backend installed
    pub const fn new() -> Self {
        Self {
            backend: RwLock::new(None),
        }
    }

    /// Install the thread-area backend
    pub fn set_backend(&self, backend: Arc<dyn ThreadAreaOps>) {
        *self.backend.write() = Some(backend);
    }

    fn backend(&self) -> Arc<dyn ThreadAreaOps> {
        self.backend
            .read()
            .clone()
            .expect("thread area access with no backend installed")
    }

    /// Read the active thread-area base via the installed backend
    pub fn read(&self) -> VirtAddr {
        self.backend().read()
    }

    /// Install a thread-area base via the installed backend.
    ///
    /// # Safety
    /// See [`ThreadAreaOps::write`].
    pub unsafe fn write(&self, area: VirtAddr) {
        unsafe { self.backend().write(area) }
    }
}

/// Hardware backend using the FS-base MSR.
#[cfg(target_arch = "x86_64")]
pub struct FsBaseArea;

#[cfg(target_arch = "x86_64")]
impl ThreadAreaOps for FsBaseArea {
    fn read(&self) -> VirtAddr {
        VirtAddr::new(unsafe { ember_hal::arch::x86_64::thread::read_thread_area() })
    }

    unsafe fn write(&self, area: VirtAddr) {
        unsafe { ember_hal::arch::x86_64::thread::write_thread_area(area.as_u64()) }
    }
}

/// Global thread-area engine
static AREA: ThreadAreaEngine = ThreadAreaEngine::new();

/// Get the thread-area engine
pub fn thread_area() -> &'static ThreadAreaEngine {
    &AREA
}

/// Activate `area` as `thread`'s thread-local-storage.
///
/// Records the area on the control block, writes the thread's identity into
/// the header so the running context can locate itself, and installs the
/// area on the calling processor. Happens once per thread.
///
/// # Safety
/// `area` must point to writable memory holding a [`TcbHeader`], and must
/// remain valid for the thread's lifetime.
pub unsafe fn activate(thread: &Thread, area: VirtAddr) {
    thread.set_tls_area(area);
    unsafe {
        let header = area.as_mut_ptr::<TcbHeader>();
        (*header).kernel_thread = thread.id().as_u64();
        thread_area().write(area);
    }
    log::trace!(
        "thread {} activated tls {:#x}",
        thread.id().as_u64(),
        area.as_u64()
    );
}

/// Identity of the thread whose thread-area is active on the calling
/// processor.
///
/// Valid after the processor's main thread has been set up; every installed
/// area carries a header written by [`activate`].
pub fn current_thread_id() -> ThreadId {
    let area = thread_area().read();
    // Installed areas always hold a header; see the activate contract.
    let raw = unsafe { (*area.as_ptr::<TcbHeader>()).kernel_thread };
    ThreadId::from_raw(raw)
}
