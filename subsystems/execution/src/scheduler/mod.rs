//! # Cooperative Scheduling
//!
//! The control-flow primitives that move a processor between threads:
//! clone-style creation, voluntary suspend+yield, resume, exit and the
//! per-processor bootstrap. Scheduling policy is strict FIFO over the
//! processor-local wait queue; a switch happens only here.
//!
//! Every operation takes the processor index explicitly. The terminal
//! transfer itself goes through [`crate::context::engine`], so all
//! bookkeeping completes before control leaves the scheduler.

pub mod metrics;
pub mod queue;

#[cfg(test)]
mod tests;

use crate::context::{engine, Continuation};
use crate::thread::local_storage::{self, current_thread_id, thread_area};
use crate::thread::registry::{find, manager};
use crate::thread::{CloneFlags, Thread};
use crate::{ExecError, ExecResult, ThreadId};
use alloc::sync::Arc;
use ember_hal::VirtAddr;
use metrics::metrics;

pub use metrics::SchedulerMetrics;
pub use queue::WaitQueue;

/// Bootstrap the implicit main thread of processor `cpu` from the already
/// running context.
///
/// Reads the active thread-area, registers the main thread (identity 0, no
/// parent) and writes its identity into the area's header. The main thread
/// becomes the adoptive parent for any thread orphaned on this processor.
///
/// # Safety
/// The thread-area backend must be installed and the active area must point
/// to a writable control-block header. Call once per processor, after
/// [`crate::thread::registry::init`].
pub unsafe fn setup_main_thread(cpu: usize, stack: VirtAddr) -> ExecResult<ThreadId> {
    let thread = Arc::new(Thread::new(ThreadId::main(), None, stack, None));
    manager(cpu).insert(thread.clone())?;
    let area = thread_area().read();
    unsafe { local_storage::activate(&thread, area) };
    log::debug!("cpu{cpu}: main thread ready");
    Ok(ThreadId::main())
}

/// The thread whose thread-area is active on processor `cpu`, if it is
/// registered there.
pub fn current(cpu: usize) -> Option<Arc<Thread>> {
    manager(cpu).get(current_thread_id())
}

/// Create a thread, clone-style.
///
/// Allocates a control block with the next identity, links it as a child of
/// `parent` and registers it with processor `cpu`'s manager. The new thread
/// does not run; its first resume uses fresh-clone-return semantics once a
/// continuation has been stored for it.
///
/// Flags: [`CloneFlags::CHILD_SETTID`] writes the new identity to `ctid`
/// before returning; [`CloneFlags::CHILD_CLEARTID`] records `ctid` for
/// zeroing at exit. Failures are reported as values, never unwound.
///
/// # Safety
/// When `CHILD_SETTID` is set, `ctid` must point to writable memory for a
/// `u64`.
pub unsafe fn thread_create(
    cpu: usize,
    parent: ThreadId,
    flags: CloneFlags,
    ctid: VirtAddr,
    stack: VirtAddr,
) -> ExecResult<ThreadId> {
    let mgr = manager(cpu);
    let parent_thread = mgr.get(parent).ok_or(ExecError::ThreadNotFound)?;

    let clear = flags
        .contains(CloneFlags::CHILD_CLEARTID)
        .then_some(ctid);
    let id = ThreadId::new();
    let thread = Arc::new(Thread::new(id, Some(parent), stack, clear));
    parent_thread.add_child(id);

    if flags.contains(CloneFlags::CHILD_SETTID) {
        unsafe { ctid.as_mut_ptr::<u64>().write_volatile(id.as_u64()) };
    }

    if let Err(err) = mgr.insert(thread) {
        parent_thread.remove_child(id);
        return Err(err);
    }
    metrics().record_creation();
    log::debug!(
        "cpu{cpu}: created thread {} parent {}",
        id.as_u64(),
        parent.as_u64()
    );
    Ok(id)
}

/// Voluntarily give up processor `cpu`.
///
/// If nothing else is waiting, the request is a no-op and the caller keeps
/// running. Otherwise the running thread records `(ip, sp)` as its
/// continuation, joins the back of the wait queue, and the queue's front
/// thread is resumed. The two queue steps are adjacent, so the thread that
/// just suspended can never pop itself.
///
/// # Safety
/// `(ip, sp)` must be the genuine resumption point of the running context;
/// when a switch happens this call does not return until another thread
/// resumes the saved continuation.
pub unsafe fn suspend_and_yield(cpu: usize, ip: VirtAddr, sp: VirtAddr) {
    let mgr = manager(cpu);
    // Nothing else runnable: skip the whole protocol.
    if mgr.suspended_empty() {
        return;
    }

    let running = current(cpu).expect("yield from a context with no active thread");
    running.store_continuation(Continuation::new(ip, sp));
    mgr.suspend(running.id());

    let next_id = mgr.wakeup_next();
    let next = mgr.get(next_id).expect("woken thread missing from registry");
    metrics().record_yield();
    // The next resume of the suspending thread replays its continuation.
    running.mark_yielded();
    unsafe { resume_thread(&next) }
}

/// Resume a thread registered on processor `cpu`.
///
/// # Safety
/// Terminal when the hardware backend is installed: the calling context is
/// abandoned. The target must carry a saved continuation and an activated
/// thread-area, and must not be running on any processor.
pub unsafe fn resume(cpu: usize, id: ThreadId) {
    let thread = manager(cpu)
        .get(id)
        .expect("resume of an unregistered thread");
    unsafe { resume_thread(&thread) }
}

/// Terminate a thread registered on processor `cpu`.
///
/// Teardown happens first, while every captured value is still reachable:
/// children are re-parented to the processor's main thread, the thread is
/// unlinked from its parent, the clear-on-exit address (if any) is zeroed,
/// and the control block is removed from the registry and purged from the
/// wait queue, then freed. Only after that, if the exiting thread is the one
/// physically running, its former parent is resumed as the visibly last
/// step.
///
/// # Safety
/// Terminal when exiting the running thread. A recorded clear-on-exit
/// address must still point to writable memory for a `u64`.
pub unsafe fn exit(cpu: usize, id: ThreadId) {
    let mgr = manager(cpu);
    let thread = mgr.get(id).expect("exit of an unregistered thread");
    let exiting_self = current_thread_id() == id;
    let parent_id = thread.parent().expect("the main thread cannot exit");

    // Orphan adoption: re-home surviving children to the main thread.
    // Resolution goes through the process-wide lookup so children whose
    // bookkeeping migrated elsewhere are still reached.
    let orphans = thread.take_children();
    if !orphans.is_empty() {
        let main = mgr
            .main_thread()
            .expect("exit with children before main thread bootstrap");
        for child_id in orphans {
            if let Some((_, child)) = find(child_id) {
                child.set_parent(ThreadId::main());
                main.add_child(child_id);
            }
        }
    }

    // Unlink from the parent before anything is freed.
    let parent = mgr
        .get(parent_id)
        .or_else(|| find(parent_id).map(|(_, t)| t))
        .expect("exiting thread has no live parent");
    parent.remove_child(id);

    // CHILD_CLEARTID: the join signal a waiter may be spinning on.
    if let Some(addr) = thread.clear_child_tid() {
        log::trace!("clearing child tid at {:#x}", addr.as_u64());
        unsafe { addr.as_mut_ptr::<u64>().write_volatile(0) };
    }

    // Remove from every structure that can still reach the thread, then
    // free the control block. Nothing below touches it again.
    let registered = mgr.remove(id);
    mgr.erase_suspension(id);
    metrics().record_exit();
    log::debug!("cpu{cpu}: thread {} exited", id.as_u64());
    drop(registered);
    drop(thread);

    if exiting_self {
        // A resumed thread is never queued; make that unconditional before
        // handing the processor to the parent.
        mgr.erase_suspension(parent_id);
        unsafe { resume_thread(&parent) }
    }
}

/// Hand the processor to `thread`.
///
/// Picks the restore discipline from the thread's own yielded marker:
/// fresh-clone-return for a thread that has never run, continuation-restore
/// (consuming the marker) after a voluntary suspend. The target's
/// thread-area is installed immediately before the transfer.
unsafe fn resume_thread(thread: &Thread) {
    let cont = thread
        .continuation()
        .expect("resume of a thread with no saved continuation");
    let area = thread
        .tls_area()
        .expect("resume of a thread with no activated thread area");
    log::trace!(
        "resuming thread {} ip={:#x} sp={:#x}",
        thread.id().as_u64(),
        cont.ip.as_u64(),
        cont.sp.as_u64()
    );
    metrics().record_context_switch();
    if thread.consume_yielded() {
        unsafe {
            thread_area().write(area);
            engine().restore(cont);
        }
    } else {
        unsafe {
            thread_area().write(area);
            engine().clone_return(cont);
        }
    }
}
