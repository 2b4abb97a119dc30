//! # Thread Area and Control Transfer
//!
//! The two architecture primitives the cooperative scheduler is built on:
//! access to the FS segment base (the thread-local-storage area on x86_64)
//! and the never-returning jumps that hand the CPU to another thread.

use super::cpu;
use core::arch::naked_asm;

/// MSR holding the FS segment base: the active thread-area on x86_64.
pub const IA32_FS_BASE: u32 = 0xC000_0100;

/// Read the calling processor's active thread-area base.
///
/// # Safety
/// Requires ring 0 (MSR access).
#[inline]
pub unsafe fn read_thread_area() -> u64 {
    unsafe { cpu::read_msr(IA32_FS_BASE) }
}

/// Install a new thread-area base for the calling processor.
///
/// Takes effect before any subsequent FS-relative access.
///
/// # Safety
/// Requires ring 0. `area` must point to a valid thread control block; all
/// thread-local accesses after this call resolve against it.
#[inline]
pub unsafe fn write_thread_area(area: u64) {
    unsafe { cpu::write_msr(IA32_FS_BASE, area) }
}

/// Resume a previously suspended thread: switch to `sp` and continue at `ip`.
///
/// The stack must be the one captured when the thread suspended; execution
/// continues as if the suspension point had just returned.
///
/// # Safety
/// Never returns. `ip` must be a valid instruction address and `sp` the
/// matching stack pointer of a suspended thread whose thread-area is already
/// installed.
#[unsafe(naked)]
pub unsafe extern "C" fn thread_restore(_ip: u64, _sp: u64) -> ! {
    naked_asm!(
        "mov rsp, rsi",
        "jmp rdi",
    )
}

/// First transfer into a freshly created thread.
///
/// Switches to `sp`, clears the return-value register so the new thread
/// observes the clone-style child result, and continues at `ip`.
///
/// # Safety
/// Never returns. Same requirements as [`thread_restore`]; additionally the
/// target must be a thread that has not run since creation.
#[unsafe(naked)]
pub unsafe extern "C" fn clone_return(_ip: u64, _sp: u64) -> ! {
    naked_asm!(
        "mov rsp, rsi",
        "xor eax, eax",
        "jmp rdi",
    )
}
