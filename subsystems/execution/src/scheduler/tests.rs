//! # Lifecycle Tests
//!
//! Scenario tests for the cooperative core, driven through recording fake
//! backends so every bookkeeping step stays observable after a "switch".

use super::metrics::metrics;
use super::{current, exit, resume, setup_main_thread, suspend_and_yield, thread_create};
use crate::context::{engine, Continuation, SwitchOps};
use crate::thread::local_storage::{activate, thread_area, TcbHeader, ThreadAreaOps};
use crate::thread::registry::{self, find, manager};
use crate::thread::CloneFlags;
use crate::{ExecError, ThreadId};
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use ember_hal::VirtAddr;
use spin::Mutex;

// =========================================================================
// Test Doubles
// =========================================================================

/// A recorded control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transfer {
    Restore(Continuation),
    CloneReturn(Continuation),
}

/// Switch backend that records transfers instead of performing them
#[derive(Default)]
struct RecordingSwitch {
    transfers: Mutex<Vec<Transfer>>,
}

impl RecordingSwitch {
    fn take(&self) -> Vec<Transfer> {
        core::mem::take(&mut *self.transfers.lock())
    }

    fn last(&self) -> Option<Transfer> {
        self.transfers.lock().last().copied()
    }
}

impl SwitchOps for RecordingSwitch {
    unsafe fn restore(&self, to: Continuation) {
        self.transfers.lock().push(Transfer::Restore(to));
    }

    unsafe fn clone_return(&self, to: Continuation) {
        self.transfers.lock().push(Transfer::CloneReturn(to));
    }
}

/// Thread-area backend backed by a plain slot
#[derive(Default)]
struct FakeArea {
    slot: Mutex<u64>,
}

impl ThreadAreaOps for FakeArea {
    fn read(&self) -> VirtAddr {
        VirtAddr::new(*self.slot.lock())
    }

    unsafe fn write(&self, area: VirtAddr) {
        *self.slot.lock() = area.as_u64();
    }
}

// =========================================================================
// Harness
// =========================================================================

/// Processor pool shared by every test; each test uses its own index so
/// registries never interfere. The engines are process-global, so tests
/// touching them run serialized.
const TEST_CPUS: usize = 32;

static TEST_LOCK: Mutex<()> = Mutex::new(());

fn new_tls_block() -> VirtAddr {
    let header = Box::leak(Box::new(TcbHeader {
        tcb_self: 0,
        dtv: 0,
        kernel_thread: u64::MAX,
    }));
    VirtAddr::new(header as *mut TcbHeader as u64)
}

fn set_current(area: VirtAddr) {
    unsafe { thread_area().write(area) };
}

/// Install fresh backends, bootstrap `cpu`'s main thread and return the
/// recording switch plus the main thread's TLS block.
fn boot(cpu: usize) -> (Arc<RecordingSwitch>, VirtAddr) {
    registry::init(TEST_CPUS);
    let switch = Arc::new(RecordingSwitch::default());
    engine().set_backend(switch.clone());
    thread_area().set_backend(Arc::new(FakeArea::default()));
    let main_tls = new_tls_block();
    set_current(main_tls);
    unsafe { setup_main_thread(cpu, VirtAddr::new(0x5000)) }.unwrap();
    (switch, main_tls)
}

fn spawn(cpu: usize, parent: ThreadId) -> ThreadId {
    unsafe {
        thread_create(
            cpu,
            parent,
            CloneFlags::empty(),
            VirtAddr::new(0),
            VirtAddr::new(0x9000),
        )
    }
    .unwrap()
}

/// Give a thread everything a resume needs: an activated TLS block and a
/// saved continuation. Activation installs the block, so the thread becomes
/// the current one until `set_current` says otherwise.
fn arm(cpu: usize, id: ThreadId, ip: u64, sp: u64) -> (Continuation, VirtAddr) {
    let thread = manager(cpu).get(id).unwrap();
    let tls = new_tls_block();
    unsafe { activate(&thread, tls) };
    let cont = Continuation::new(VirtAddr::new(ip), VirtAddr::new(sp));
    thread.store_continuation(cont);
    (cont, tls)
}

// =========================================================================
// Creation
// =========================================================================

#[test]
fn creation_links_children_in_order_with_monotonic_ids() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 0;
    let (_switch, _main_tls) = boot(CPU);

    let t1 = spawn(CPU, ThreadId::main());
    let t2 = spawn(CPU, ThreadId::main());
    let t3 = spawn(CPU, ThreadId::main());

    assert_eq!(t2.as_u64(), t1.as_u64() + 1);
    assert_eq!(t3.as_u64(), t2.as_u64() + 1);
    assert_eq!(ThreadId::last(), t3);

    let mgr = manager(CPU);
    let main = mgr.main_thread().unwrap();
    assert_eq!(main.children(), [t1, t2, t3]);
    for id in [t1, t2, t3] {
        let thread = mgr.get(id).unwrap();
        assert_eq!(thread.parent(), Some(ThreadId::main()));
        // registered on exactly this processor, queued nowhere
        assert_eq!(find(id).map(|(cpu, _)| cpu), Some(CPU));
        assert!(!mgr.suspended_contains(id));
    }
}

#[test]
fn settid_writes_child_identity_before_returning() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 1;
    boot(CPU);

    let mut slot: u64 = 0;
    let ctid = VirtAddr::new(&mut slot as *mut u64 as u64);
    let id = unsafe {
        thread_create(
            CPU,
            ThreadId::main(),
            CloneFlags::CHILD_SETTID,
            ctid,
            VirtAddr::new(0x9000),
        )
    }
    .unwrap();

    assert_eq!(slot, id.as_u64());
}

#[test]
fn create_with_unknown_parent_fails() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 13;
    boot(CPU);

    let result = unsafe {
        thread_create(
            CPU,
            ThreadId::from_raw(0xdead),
            CloneFlags::empty(),
            VirtAddr::new(0),
            VirtAddr::new(0x9000),
        )
    };
    assert_eq!(result, Err(ExecError::ThreadNotFound));
}

// =========================================================================
// Yield
// =========================================================================

#[test]
fn yield_with_empty_queue_is_a_noop() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 3;
    let (switch, _main_tls) = boot(CPU);

    unsafe { suspend_and_yield(CPU, VirtAddr::new(0x10), VirtAddr::new(0x20)) };

    // No switch, no bookkeeping: the caller just keeps running.
    assert!(switch.take().is_empty());
    let main = manager(CPU).main_thread().unwrap();
    assert!(main.continuation().is_none());
    assert!(!main.has_yielded());
    assert!(manager(CPU).suspended_empty());
    assert_eq!(current(CPU).unwrap().id(), ThreadId::main());
}

#[test]
fn yield_resumes_the_fifo_head_and_queues_the_caller() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 4;
    let (switch, main_tls) = boot(CPU);

    let t1 = spawn(CPU, ThreadId::main());
    let t2 = spawn(CPU, ThreadId::main());
    let (c1, _) = arm(CPU, t1, 0x100, 0x200);
    arm(CPU, t2, 0x300, 0x400);
    set_current(main_tls);

    let mgr = manager(CPU);
    mgr.suspend(t1);
    mgr.suspend(t2);

    let main_cont = Continuation::new(VirtAddr::new(0x500), VirtAddr::new(0x600));
    unsafe { suspend_and_yield(CPU, main_cont.ip, main_cont.sp) };

    // t1 was the queue head and had never run: fresh-clone-return.
    assert_eq!(switch.take(), [Transfer::CloneReturn(c1)]);

    // The caller saved its continuation, marked itself yielded and joined
    // the back of the queue, behind t2.
    let main = mgr.main_thread().unwrap();
    assert_eq!(main.continuation(), Some(main_cont));
    assert!(main.has_yielded());
    assert_eq!(mgr.wakeup_next(), t2);
    assert_eq!(mgr.wakeup_next(), ThreadId::main());
    assert!(mgr.suspended_empty());
}

#[test]
fn suspending_two_threads_wakes_them_in_fifo_order() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 15;
    boot(CPU);

    let t1 = spawn(CPU, ThreadId::main());
    let t2 = spawn(CPU, ThreadId::main());
    let mgr = manager(CPU);
    mgr.suspend(t1);
    mgr.suspend(t2);

    assert_eq!(mgr.wakeup_next(), t1);
    assert_eq!(mgr.wakeup_next(), t2);
}

// =========================================================================
// Resume
// =========================================================================

#[test]
fn first_resume_is_fresh_clone_later_resumes_replay_the_continuation() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 5;
    let (switch, main_tls) = boot(CPU);

    let t = spawn(CPU, ThreadId::main());
    let (c1, t_tls) = arm(CPU, t, 0x100, 0x200);
    set_current(main_tls);

    // First resume after creation: fresh-clone-return, marker untouched.
    unsafe { resume(CPU, t) };
    assert_eq!(switch.take(), [Transfer::CloneReturn(c1)]);
    let thread = manager(CPU).get(t).unwrap();
    assert!(!thread.has_yielded());

    // The thread later yields voluntarily (main is waiting in the queue).
    let main = manager(CPU).main_thread().unwrap();
    main.store_continuation(Continuation::new(VirtAddr::new(0x500), VirtAddr::new(0x600)));
    manager(CPU).suspend(ThreadId::main());
    set_current(t_tls);
    let c2 = Continuation::new(VirtAddr::new(0x110), VirtAddr::new(0x210));
    unsafe { suspend_and_yield(CPU, c2.ip, c2.sp) };
    assert!(thread.has_yielded());

    // Resume after the suspend: continuation-restore, marker cleared.
    switch.take();
    unsafe { resume(CPU, t) };
    assert_eq!(switch.take(), [Transfer::Restore(c2)]);
    assert!(!thread.has_yielded());
}

#[test]
#[should_panic(expected = "no saved continuation")]
fn resume_without_continuation_faults() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 11;
    boot(CPU);
    let t = spawn(CPU, ThreadId::main());
    unsafe { resume(CPU, t) };
}

#[test]
fn current_follows_the_installed_thread_area() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 10;
    let (_switch, main_tls) = boot(CPU);
    assert_eq!(current(CPU).unwrap().id(), ThreadId::main());

    let t = spawn(CPU, ThreadId::main());
    // Activation installs the new area: the child is now the located one.
    arm(CPU, t, 0x100, 0x200);
    assert_eq!(current(CPU).unwrap().id(), t);

    set_current(main_tls);
    assert_eq!(current(CPU).unwrap().id(), ThreadId::main());
}

// =========================================================================
// Exit
// =========================================================================

#[test]
fn exit_clears_the_recorded_tid_address_and_unregisters() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 2;
    let (switch, _main_tls) = boot(CPU);

    let mut slot: u64 = 0xdead_beef;
    let ctid = VirtAddr::new(&mut slot as *mut u64 as u64);
    let t = unsafe {
        thread_create(
            CPU,
            ThreadId::main(),
            CloneFlags::CHILD_CLEARTID,
            ctid,
            VirtAddr::new(0x9000),
        )
    }
    .unwrap();

    // Exiting a thread that is not the running one: teardown only.
    unsafe { exit(CPU, t) };

    assert_eq!(slot, 0);
    assert!(manager(CPU).get(t).is_none());
    assert!(!manager(CPU).suspended_contains(t));
    assert!(find(t).is_none());
    assert!(!manager(CPU)
        .main_thread()
        .unwrap()
        .children()
        .contains(&t));
    assert!(switch.take().is_empty());
}

#[test]
fn exit_reparents_children_to_the_main_thread() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 7;
    boot(CPU);

    let t = spawn(CPU, ThreadId::main());
    let c1 = spawn(CPU, t);
    let c2 = spawn(CPU, t);

    unsafe { exit(CPU, t) };

    let mgr = manager(CPU);
    let main = mgr.main_thread().unwrap();
    for child in [c1, c2] {
        assert_eq!(mgr.get(child).unwrap().parent(), Some(ThreadId::main()));
        assert!(main.children().contains(&child));
    }
    assert!(!main.children().contains(&t));
    assert!(find(t).is_none());
}

#[test]
fn exiting_the_running_thread_hands_control_to_its_parent() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 6;
    let (switch, _main_tls) = boot(CPU);

    let t = spawn(CPU, ThreadId::main());
    let (_c, t_tls) = arm(CPU, t, 0x100, 0x200);

    // The parent yielded earlier and is sitting in the queue.
    let mgr = manager(CPU);
    let main = mgr.main_thread().unwrap();
    let main_cont = Continuation::new(VirtAddr::new(0x500), VirtAddr::new(0x600));
    main.store_continuation(main_cont);
    main.mark_yielded();
    mgr.suspend(ThreadId::main());

    set_current(t_tls);
    switch.take();
    unsafe { exit(CPU, t) };

    // The parent was purged from the queue and resumed as the last step.
    assert!(!mgr.suspended_contains(ThreadId::main()));
    assert_eq!(switch.last(), Some(Transfer::Restore(main_cont)));
    assert!(mgr.get(t).is_none());
    assert!(!main.children().contains(&t));
}

#[test]
#[should_panic(expected = "main thread cannot exit")]
fn exiting_the_main_thread_faults() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 12;
    boot(CPU);
    unsafe { exit(CPU, ThreadId::main()) };
}

// =========================================================================
// Migration
// =========================================================================

#[test]
fn migration_moves_bookkeeping_and_preserves_state() {
    let _serial = TEST_LOCK.lock();
    const SOURCE: usize = 8;
    const TARGET: usize = 9;
    boot(SOURCE);

    let t = spawn(SOURCE, ThreadId::main());
    let child = spawn(SOURCE, t);
    let before = manager(SOURCE).get(t).unwrap();

    manager(SOURCE).migrate(t, TARGET);

    assert!(manager(SOURCE).get(t).is_none());
    let after = manager(TARGET).get(t).unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(after.parent(), Some(ThreadId::main()));
    assert_eq!(after.children(), [child]);
    assert_eq!(find(t).map(|(cpu, _)| cpu), Some(TARGET));
}

#[test]
#[should_panic(expected = "erase of a thread unknown")]
fn migrating_an_unknown_thread_faults() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 16;
    boot(CPU);
    manager(CPU).migrate(ThreadId::from_raw(0xbad), CPU);
}

// =========================================================================
// Metrics
// =========================================================================

#[test]
fn lifecycle_events_are_counted() {
    let _serial = TEST_LOCK.lock();
    const CPU: usize = 14;
    let (_switch, main_tls) = boot(CPU);

    let m = metrics();
    let creations = m.creations();
    let exits = m.exits();
    let switches = m.context_switches();

    let t = spawn(CPU, ThreadId::main());
    assert_eq!(m.creations(), creations + 1);

    arm(CPU, t, 0x100, 0x200);
    unsafe { resume(CPU, t) };
    assert_eq!(m.context_switches(), switches + 1);

    // Back on the main thread: the exit below is not a self-exit.
    set_current(main_tls);
    unsafe { exit(CPU, t) };
    assert_eq!(m.exits(), exits + 1);
}
