// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Kernel state and startup.
//!
//! All mutable kernel state -- the task table, scheduler bookkeeping, the
//! time-of-day base, and the listener table -- lives in one [`KernelState`]
//! value with a single static instance. Access goes through
//! [`with_kernel`], which enters the critical section and hands out the one
//! `&mut`; a recursion guard turns aliasing mistakes into a halt instead of
//! undefined behavior.
//!
//! Keeping the state in a plain value (rather than scattered statics) is
//! also what lets the host tests run the whole scheduler against private
//! instances, in parallel, without touching the real one.

use core::sync::atomic::{AtomicBool, Ordering};

use abi::Priority;

use crate::arch;
use crate::crit;
use crate::descs::{TaskDesc, MAX_TASKS};
use crate::sanity::SanityRegistry;
use crate::task::{self, Task};
use crate::time::{Listeners, Ticks, TodBase};
use crate::uassert;

/// The whole of the kernel's mutable state.
pub(crate) struct KernelState {
    /// The task table. `None` slots are free.
    pub(crate) tasks: [Option<Task>; MAX_TASKS],
    /// Index of the running task, once the scheduler has started.
    pub(crate) current: Option<usize>,
    /// Set by [`KernelState::begin_scheduling`]; until then, tasks can be
    /// created but nothing runs and ticks only move the counter.
    pub(crate) started: bool,
    /// Count of task identifiers handed out. Never rewound, and one wider
    /// than the 8-bit id itself so exhaustion of the id space is
    /// detectable instead of silently wrapping.
    pub(crate) next_task_id: u16,
    /// Tick at which the last context switch happened, for run-time
    /// accounting.
    pub(crate) last_switch: Ticks,
    /// Base records for uptime and wall-clock derivation.
    pub(crate) tod: TodBase,
    /// Registered time change listeners.
    pub(crate) listeners: Listeners,
    /// External sanity watchdog, if one has been installed.
    pub(crate) sanity_registry: Option<&'static dyn SanityRegistry>,
}

impl KernelState {
    pub(crate) const fn new() -> Self {
        const EMPTY: Option<Task> = None;
        Self {
            tasks: [EMPTY; MAX_TASKS],
            current: None,
            started: false,
            next_task_id: 0,
            last_switch: Ticks::ZERO,
            tod: TodBase::new(),
            listeners: Listeners::new(),
            sanity_registry: None,
        }
    }

    /// Marks the scheduler started and dispatches the most important ready
    /// task, returning the saved-state slot the architecture layer should
    /// enter first.
    pub(crate) fn begin_scheduling(
        &mut self,
        now: Ticks,
    ) -> *mut arch::SavedState {
        uassert!(!self.started);
        self.started = true;
        self.last_switch = now;

        let first = match task::select(&self.tasks, self.tasks.len() - 1) {
            Some(index) => index,
            None => panic!(), // started with no tasks, not even idle
        };
        self.switch_to(first, now);

        match self.current.and_then(|i| self.tasks[i].as_mut()) {
            Some(task) => &mut task.save as *mut arch::SavedState,
            None => panic!(),
        }
    }
}

/// Tracks when the mutable reference to the kernel state is floating around
/// in kernel code, to prevent production of a second one. This forms a sort
/// of ad-hoc Mutex around the state.
static KERNEL_IN_USE: AtomicBool = AtomicBool::new(false);

/// The kernel state instance. Only [`with_kernel`] may touch this.
static mut KERNEL: KernelState = KernelState::new();

/// Runs `body` with the kernel state, inside the critical section.
///
/// To preserve uniqueness of the `&mut` passed into `body`, recursive calls
/// are detected and halt the system.
pub(crate) fn with_kernel<R>(body: impl FnOnce(&mut KernelState) -> R) -> R {
    crit::with(|| {
        if KERNEL_IN_USE.swap(true, Ordering::Acquire) {
            panic!(); // recursive use of with_kernel
        }
        // Safety: the flag above ensures no other reference to KERNEL
        // exists, and the critical section keeps ISRs from creating one
        // underneath us.
        let kernel = unsafe { &mut *core::ptr::addr_of_mut!(KERNEL) };
        let r = body(kernel);
        KERNEL_IN_USE.store(false, Ordering::Release);
        r
    })
}

/// Stack for the idle task. Aligned for exception-frame layout on ARM.
#[repr(C, align(8))]
struct IdleStack([u32; IDLE_STACK_WORDS]);

const IDLE_STACK_WORDS: usize = 64;

static mut IDLE_STACK: IdleStack = IdleStack([0; IDLE_STACK_WORDS]);

/// What idle does: nothing, as electrically cheaply as possible.
fn idle_main(_arg: usize) -> ! {
    loop {
        arch::wait_for_interrupt();
    }
}

/// The main kernel entry point.
///
/// The board's startup code performs hardware setup, creates the
/// application's initial tasks, and then calls this function, which
/// installs the idle task, starts the scheduler, and hands the processor to
/// the most important ready task. Does not return.
///
/// `tick_divisor` is the platform-specific count of machine time units per
/// kernel tick (on ARM M-profile, CPU cycles per SysTick interrupt).
///
/// # Safety
///
/// Must be called at most once per boot. Architecture-specific requirements
/// apply; on ARM it must run from the main stack in privileged Thread mode.
pub unsafe fn start_kernel(tick_divisor: u32) -> ! {
    // The idle task keeps the ready set nonempty forever after.
    //
    // Safety: single call per boot means this is the only reference ever
    // taken to IDLE_STACK.
    let idle_stack = unsafe { &mut *core::ptr::addr_of_mut!(IDLE_STACK) };
    let created = task::task_create(TaskDesc {
        name: "idle",
        entry: idle_main,
        arg: 0,
        priority: Priority::IDLE,
        sanity_itvl: None,
        stack: &mut idle_stack.0,
    });
    uassert!(created.is_ok());

    let first = with_kernel(|k| k.begin_scheduling(crate::time::now()));

    // Safety: per our own contract, we're on the main stack, privileged,
    // once per boot, and `first` points into the static task table.
    unsafe { arch::start_first_task(tick_divisor, first) }
}
