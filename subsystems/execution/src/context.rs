//! # Context Switch Interface
//!
//! Narrow interface over the architecture switch stubs. Exactly two
//! operations exist: restoring a previously suspended continuation and the
//! first transfer into a freshly created thread. Both are terminal on real
//! hardware; the rest of the core only prepares bookkeeping and hands the
//! continuation to the engine as its visibly last step.

use alloc::sync::Arc;
use ember_hal::VirtAddr;
use spin::RwLock;

/// A suspended execution point: the instruction/stack pair sufficient to
/// resume a thread exactly where it left off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    /// Next instruction address
    pub ip: VirtAddr,
    /// Stack pointer at the suspension point
    pub sp: VirtAddr,
}

impl Continuation {
    /// Create a continuation from an instruction/stack pair.
    pub const fn new(ip: VirtAddr, sp: VirtAddr) -> Self {
        Self { ip, sp }
    }
}

/// Architecture context-switch primitive.
///
/// Implementations transfer control and never return. Test doubles instead
/// record the call and return, so scheduler bookkeeping stays observable.
pub trait SwitchOps: Send + Sync {
    /// Transfer control to a previously captured continuation.
    ///
    /// # Safety
    /// All scheduler bookkeeping must be complete: the target's thread-area
    /// must already be installed and the continuation must belong to a
    /// suspended thread.
    unsafe fn restore(&self, to: Continuation);

    /// Transfer control to a thread that has never run, delivering the
    /// clone-style child return value.
    ///
    /// # Safety
    /// Same as [`SwitchOps::restore`]; the target must not have run since
    /// creation.
    unsafe fn clone_return(&self, to: Continuation);
}

/// Context switch engine
///
/// Holds the installed switch backend and provides the stable entry point
/// used by the scheduler.
pub struct SwitchEngine {
    backend: RwLock<Option<Arc<dyn SwitchOps>>>,
}

impl SwitchEngine {
    /// Create a new engine with no backend installed
    pub const fn new() -> Self {
        Self {
            backend: RwLock::new(None),
        }
    }

    /// Install the switch backend
    pub fn set_backend(&self, backend: Arc<dyn SwitchOps>) {
        *self.backend.write() = Some(backend);
    }

    fn backend(&self) -> Arc<dyn SwitchOps> {
        self.backend
            .read()
            .clone()
            .expect("context switch with no backend installed")
    }

    /// Restore a suspended continuation via the installed backend.
    ///
    /// # Safety
    /// See [`SwitchOps::restore`].
    pub unsafe fn restore(&self, to: Continuation) {
        unsafe { self.backend().restore(to) }
    }

    /// First transfer into a fresh thread via the installed backend.
    ///
    /// # Safety
    /// See [`SwitchOps::clone_return`].
    pub unsafe fn clone_return(&self, to: Continuation) {
        unsafe { self.backend().clone_return(to) }
    }
}

/// Hardware backend calling the x86_64 stubs.
#[cfg(target_arch = "x86_64")]
pub struct HardwareSwitch;

#[cfg(target_arch = "x86_64")]
impl SwitchOps for HardwareSwitch {
    unsafe fn restore(&self, to: Continuation) {
        unsafe { ember_hal::arch::x86_64::thread::thread_restore(to.ip.as_u64(), to.sp.as_u64()) }
    }

    unsafe fn clone_return(&self, to: Continuation) {
        unsafe { ember_hal::arch::x86_64::thread::clone_return(to.ip.as_u64(), to.sp.as_u64()) }
    }
}

/// Global context switch engine
static ENGINE: SwitchEngine = SwitchEngine::new();

/// Get the context switch engine
pub fn engine() -> &'static SwitchEngine {
    &ENGINE
}
